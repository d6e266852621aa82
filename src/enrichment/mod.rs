/// Incident enrichment engine
///
/// This module provides the hybrid classification pipeline:
/// - Keyword-rule classification (always runs, fallback floor)
/// - Embedding generation via an external provider
/// - Bounded in-memory similarity search over historical incidents
/// - LLM re-classification with retrieved context
/// - Orchestration with confidence-gated RAG and rule fallback

pub mod corpus;
pub mod embedding;
pub mod index;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub(crate) mod provider;
pub mod rules;

pub use corpus::{CorpusEntry, CorpusMetadata, HistoricalCorpus, InMemoryCorpus};
pub use embedding::{EmbeddingClient, OpenAiEmbeddingClient};
pub use index::{IndexMetadata, IndexStats, InsertOutcome, SimilarityIndex};
pub use llm::{
    parse_classification, LlmClassification, LlmClassifier, MajorityVoteClassifier,
    OpenAiLlmClassifier,
};
pub use models::{EnrichmentConfig, EnrichmentReport, RagState};
pub use orchestrator::{EnrichmentOrchestrator, RetryBackoff};
pub use rules::{RuleClassification, RuleClassifier};
