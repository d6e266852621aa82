use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::incident::{Category, Severity};

/// Which path produced an enrichment result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EnrichmentSource {
    Rule,
    Rag,
}

/// Derived classification for one incident
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentResult {
    pub severity: Severity,
    pub category: Category,
    pub summary: String,
    pub suggested_action: String,

    /// Self-reported certainty (0.0 - 1.0)
    pub confidence: f64,

    pub source: EnrichmentSource,

    /// Retrieved neighbours, highest score first
    #[serde(default)]
    pub similar_incidents: Vec<SimilarityMatch>,

    pub enriched_at: DateTime<Utc>,
}

impl EnrichmentResult {
    /// True when both results carry the same classification payload
    pub fn same_classification(&self, other: &EnrichmentResult) -> bool {
        self.severity == other.severity
            && self.category == other.category
            && self.summary == other.summary
            && self.suggested_action == other.suggested_action
            && self.confidence == other.confidence
            && self.source == other.source
            && self.similar_incidents == other.similar_incidents
    }
}

/// Back-reference to a historical incident retrieved as relevant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarityMatch {
    pub incident_id: Uuid,
    pub title: String,

    /// Cosine similarity clamped to 0.0 - 1.0
    pub score: f64,

    pub severity: Severity,
    pub category: Category,
    pub suggested_action: String,

    /// How the historical incident was resolved, when known
    pub resolution: Option<String>,
}

/// Dense embedding of an incident's text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn norm(&self) -> f64 {
        self.0
            .iter()
            .map(|v| f64::from(*v) * f64::from(*v))
            .sum::<f64>()
            .sqrt()
    }

    /// Raw cosine similarity in -1.0 - 1.0; `None` when dimensions differ.
    /// A zero-norm side yields 0.0.
    pub fn cosine_similarity(&self, other: &EmbeddingVector) -> Option<f64> {
        if self.dimensions() != other.dimensions() {
            return None;
        }
        let denom = self.norm() * other.norm();
        if denom == 0.0 {
            return Some(0.0);
        }
        let dot: f64 = self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| f64::from(*a) * f64::from(*b))
            .sum();
        Some(dot / denom)
    }
}

impl From<Vec<f32>> for EmbeddingVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}
