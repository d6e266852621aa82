use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::Display;
use validator::Validate;

use crate::models::EnrichmentResult;

/// Decision policy for the hybrid enrichment pipeline
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EnrichmentConfig {
    /// Enable the retrieval-augmented path
    #[serde(default)]
    pub use_rag: bool,

    /// Run RAG for every incident regardless of rule confidence
    #[serde(default)]
    pub rag_force_all: bool,

    /// Rule confidence below this value triggers RAG (0.0 - 1.0)
    #[serde(default = "default_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub rag_confidence_threshold: f64,

    /// Maximum similar incidents retrieved and reported
    #[serde(default = "default_max_similar")]
    pub rag_max_similar: usize,

    /// Retrieved incidents scoring below this are discarded (0.0 - 1.0)
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub rag_min_similarity: f64,

    /// Deadline for the whole RAG path (seconds)
    #[serde(default = "default_rag_timeout")]
    #[validate(range(min = 1))]
    pub rag_timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            use_rag: false,
            rag_force_all: false,
            rag_confidence_threshold: default_threshold(),
            rag_max_similar: default_max_similar(),
            rag_min_similarity: 0.0,
            rag_timeout_secs: default_rag_timeout(),
        }
    }
}

impl EnrichmentConfig {
    /// Whether the RAG path runs for a given rule confidence
    pub fn should_use_rag(&self, rule_confidence: f64) -> bool {
        self.use_rag && (self.rag_force_all || rule_confidence < self.rag_confidence_threshold)
    }

    pub fn rag_deadline(&self) -> Duration {
        Duration::from_secs(self.rag_timeout_secs)
    }
}

fn default_threshold() -> f64 {
    0.7
}

fn default_max_similar() -> usize {
    5
}

fn default_rag_timeout() -> u64 {
    20
}

/// Where a single enrichment request ended up
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RagState {
    RuleClassified,
    RagSkipped,
    RagInProgress,
    RagClassified,
    RagFailed,
    Merged,
}

/// Enrichment result plus how it was reached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentReport {
    pub result: EnrichmentResult,

    /// Terminal RAG decision: skipped, classified or failed
    pub rag_state: RagState,

    /// Failure that caused a fallback to rules, if any
    pub rag_failure: Option<String>,

    /// Wall-clock time spent (milliseconds)
    pub duration_ms: u64,
}
