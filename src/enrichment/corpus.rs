use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::enrichment::embedding::EmbeddingClient;
use crate::enrichment::index::{IndexMetadata, IndexStats, InsertOutcome, SimilarityIndex};
use crate::error::{IndexError, Result};
use crate::models::{
    Category, EmbeddingVector, EnrichmentResult, EnrichmentSource, Environment, ErpModule,
    Incident, Severity, SimilarityMatch,
};

/// Texts sent per embedding request while seeding
const SEED_BATCH_SIZE: usize = 100;

/// Classification recorded for a historical incident
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorpusMetadata {
    pub severity: Severity,
    pub category: Category,
    pub suggested_action: String,

    /// Resolution notes, when the incident has been resolved
    pub resolution: Option<String>,

    /// Path that produced the classification
    pub source: EnrichmentSource,
}

/// One historical incident with its embedding (if computed)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub incident: Incident,
    pub embedding: Option<EmbeddingVector>,
    pub metadata: CorpusMetadata,
}

impl CorpusEntry {
    /// Build an entry from a freshly enriched incident
    pub fn from_enrichment(
        incident: Incident,
        embedding: Option<EmbeddingVector>,
        result: &EnrichmentResult,
    ) -> Self {
        Self {
            incident,
            embedding,
            metadata: CorpusMetadata {
                severity: result.severity,
                category: result.category,
                suggested_action: result.suggested_action.clone(),
                resolution: None,
                source: result.source,
            },
        }
    }

    pub fn id(&self) -> Uuid {
        self.incident.id
    }

    fn index_metadata(&self) -> IndexMetadata {
        IndexMetadata {
            title: self.incident.title.clone(),
            severity: self.metadata.severity,
            category: self.metadata.category,
            suggested_action: self.metadata.suggested_action.clone(),
            resolution: self.metadata.resolution.clone(),
        }
    }
}

/// Append-only store of classified incidents used for retrieval
#[async_trait]
pub trait HistoricalCorpus: Send + Sync {
    /// Append an entry; ids are unique and entries are never replaced
    async fn append(&self, entry: CorpusEntry) -> Result<()>;

    /// Top-k most similar historical incidents, highest score first
    async fn query(&self, vector: &EmbeddingVector, k: usize) -> Result<Vec<SimilarityMatch>>;

    /// Get an entry by incident ID
    async fn get(&self, id: &Uuid) -> Result<Option<CorpusEntry>>;

    /// Number of recorded incidents
    async fn len(&self) -> Result<usize>;
}

/// In-memory corpus: entries in a concurrent map, vectors in a bounded index
#[derive(Clone)]
pub struct InMemoryCorpus {
    entries: Arc<DashMap<Uuid, CorpusEntry>>,
    index: Arc<SimilarityIndex>,
}

impl InMemoryCorpus {
    pub fn new(max_vectors: usize) -> Self {
        Self::with_index(Arc::new(SimilarityIndex::new(max_vectors)))
    }

    pub fn with_index(index: Arc<SimilarityIndex>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            index,
        }
    }

    pub fn index_stats(&self) -> IndexStats {
        self.index.stats()
    }
}

#[async_trait]
impl HistoricalCorpus for InMemoryCorpus {
    async fn append(&self, mut entry: CorpusEntry) -> Result<()> {
        let id = entry.id();
        if self.entries.contains_key(&id) {
            return Err(IndexError::DuplicateId(id).into());
        }

        if let Some(vector) = entry.embedding.clone() {
            match self.index.insert(id, vector, entry.index_metadata()) {
                Ok(InsertOutcome::Inserted) => {}
                Ok(InsertOutcome::CapacityExceeded { evicted }) => {
                    // Evicted records stay in the corpus but are no longer retrievable
                    for evicted_id in evicted {
                        if let Some(mut record) = self.entries.get_mut(&evicted_id) {
                            record.embedding = None;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        incident_id = %id,
                        error = %e,
                        "Embedding not indexed, storing incident without it"
                    );
                    entry.embedding = None;
                }
            }
        }

        self.entries.insert(id, entry);
        tracing::debug!(incident_id = %id, "Incident appended to historical corpus");
        Ok(())
    }

    async fn query(&self, vector: &EmbeddingVector, k: usize) -> Result<Vec<SimilarityMatch>> {
        Ok(self.index.query(vector, k))
    }

    async fn get(&self, id: &Uuid) -> Result<Option<CorpusEntry>> {
        Ok(self.entries.get(id).map(|entry| entry.clone()))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }
}

/// Resolved incident as exported from the ticketing system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalRecord {
    pub title: String,
    pub description: String,
    pub erp_module: ErpModule,
    pub environment: Environment,
    pub business_unit: String,
    pub severity: Severity,
    pub category: Category,
    pub suggested_action: String,
    #[serde(default)]
    pub resolution: Option<String>,
}

/// Load historical records into a corpus, embedding them in batches when an
/// embedder is given. Returns the number of records appended.
pub async fn seed_corpus(
    corpus: &dyn HistoricalCorpus,
    embedder: Option<&dyn EmbeddingClient>,
    records: Vec<HistoricalRecord>,
) -> Result<usize> {
    let mut seeded = 0;

    for chunk in records.chunks(SEED_BATCH_SIZE) {
        let incidents = chunk
            .iter()
            .map(|r| {
                Incident::validated(
                    r.title.clone(),
                    r.description.clone(),
                    r.erp_module,
                    r.environment,
                    r.business_unit.clone(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let embeddings: Vec<Option<EmbeddingVector>> = match embedder {
            Some(embedder) => {
                let texts: Vec<String> = incidents.iter().map(Incident::embedding_text).collect();
                embedder
                    .embed_batch(&texts)
                    .await?
                    .into_iter()
                    .map(Some)
                    .collect()
            }
            None => vec![None; incidents.len()],
        };

        for ((incident, embedding), record) in incidents.into_iter().zip(embeddings).zip(chunk) {
            corpus
                .append(CorpusEntry {
                    incident,
                    embedding,
                    metadata: CorpusMetadata {
                        severity: record.severity,
                        category: record.category,
                        suggested_action: record.suggested_action.clone(),
                        resolution: record.resolution.clone(),
                        source: EnrichmentSource::Rule,
                    },
                })
                .await?;
            seeded += 1;
        }
    }

    tracing::info!(
        seeded,
        embedded = embedder.is_some(),
        "Historical corpus seeded"
    );
    Ok(seeded)
}
