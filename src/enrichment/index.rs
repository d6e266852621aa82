use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::IndexError;
use crate::metrics::{SIMILARITY_INDEX_ENTRIES, SIMILARITY_INDEX_EVICTIONS_TOTAL};
use crate::models::{Category, EmbeddingVector, Severity, SimilarityMatch};

/// Classification recorded alongside an indexed vector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexMetadata {
    pub title: String,
    pub severity: Severity,
    pub category: Category,
    pub suggested_action: String,
    pub resolution: Option<String>,
}

/// Result of an insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Index was full; the listed oldest entries were evicted to make room
    CapacityExceeded { evicted: Vec<Uuid> },
}

/// Index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub entries: usize,
    pub capacity: usize,
    pub dimensions: Option<usize>,
    pub evictions: u64,
}

#[derive(Debug)]
struct IndexedVector {
    id: Uuid,
    seq: u64,
    vector: EmbeddingVector,
    metadata: IndexMetadata,
}

#[derive(Debug, Default)]
struct IndexInner {
    entries: VecDeque<Arc<IndexedVector>>,
    ids: HashSet<Uuid>,
    dimensions: Option<usize>,
    next_seq: u64,
    evictions: u64,
}

/// Bounded in-memory nearest-neighbour store with FIFO eviction.
///
/// Brute-force cosine scan; intended for corpora up to roughly 50k vectors.
pub struct SimilarityIndex {
    inner: RwLock<IndexInner>,
    max_entries: usize,
}

impl SimilarityIndex {
    /// Create an index holding at most `max_entries` vectors (minimum 1)
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: RwLock::new(IndexInner::default()),
            max_entries: max_entries.max(1),
        }
    }

    /// Insert a vector. Rejects duplicate ids and vectors whose dimension
    /// differs from the first vector ever inserted.
    pub fn insert(
        &self,
        id: Uuid,
        vector: EmbeddingVector,
        metadata: IndexMetadata,
    ) -> Result<InsertOutcome, IndexError> {
        let mut inner = self.inner.write();

        if inner.ids.contains(&id) {
            return Err(IndexError::DuplicateId(id));
        }
        match inner.dimensions {
            Some(expected) if expected != vector.dimensions() => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: vector.dimensions(),
                });
            }
            Some(_) => {}
            None => inner.dimensions = Some(vector.dimensions()),
        }

        let mut evicted = Vec::new();
        while inner.entries.len() >= self.max_entries {
            if let Some(oldest) = inner.entries.pop_front() {
                inner.ids.remove(&oldest.id);
                evicted.push(oldest.id);
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.ids.insert(id);
        inner.entries.push_back(Arc::new(IndexedVector {
            id,
            seq,
            vector,
            metadata,
        }));

        SIMILARITY_INDEX_ENTRIES.set(inner.entries.len() as f64);

        if evicted.is_empty() {
            Ok(InsertOutcome::Inserted)
        } else {
            inner.evictions += evicted.len() as u64;
            SIMILARITY_INDEX_EVICTIONS_TOTAL.inc_by(evicted.len() as f64);
            debug!(
                evicted = evicted.len(),
                capacity = self.max_entries,
                "Similarity index at capacity, evicted oldest entries"
            );
            Ok(InsertOutcome::CapacityExceeded { evicted })
        }
    }

    /// Top-k matches by cosine similarity, highest first; ties go to the
    /// most recently inserted entry. Empty when nothing is comparable.
    pub fn query(&self, vector: &EmbeddingVector, k: usize) -> Vec<SimilarityMatch> {
        if k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(f64, Arc<IndexedVector>)> = {
            let inner = self.inner.read();
            inner
                .entries
                .iter()
                .filter_map(|entry| {
                    entry
                        .vector
                        .cosine_similarity(vector)
                        .map(|score| (score.clamp(0.0, 1.0), Arc::clone(entry)))
                })
                .collect()
        };

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| b.1.seq.cmp(&a.1.seq)));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(score, entry)| SimilarityMatch {
                incident_id: entry.id,
                title: entry.metadata.title.clone(),
                score,
                severity: entry.metadata.severity,
                category: entry.metadata.category,
                suggested_action: entry.metadata.suggested_action.clone(),
                resolution: entry.metadata.resolution.clone(),
            })
            .collect()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.inner.read().ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn stats(&self) -> IndexStats {
        let inner = self.inner.read();
        IndexStats {
            entries: inner.entries.len(),
            capacity: self.max_entries,
            dimensions: inner.dimensions,
            evictions: inner.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(title: &str) -> IndexMetadata {
        IndexMetadata {
            title: title.to_string(),
            severity: Severity::P2,
            category: Category::DataIssue,
            suggested_action: "Investigate data integrity and verify transaction logs.".to_string(),
            resolution: Some("Re-ran posting".to_string()),
        }
    }

    fn vector(values: &[f32]) -> EmbeddingVector {
        EmbeddingVector::new(values.to_vec())
    }

    #[test]
    fn test_empty_index_query() {
        let index = SimilarityIndex::new(10);
        assert!(index.query(&vector(&[1.0, 0.0]), 5).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn test_round_trip_returns_self_first() {
        let index = SimilarityIndex::new(100);
        let mut ids = Vec::new();
        for i in 0..20 {
            let id = Uuid::new_v4();
            let angle = i as f32 * 0.15;
            index
                .insert(id, vector(&[angle.cos(), angle.sin(), 0.1 * i as f32]), metadata("t"))
                .unwrap();
            ids.push(id);
        }

        for (i, id) in ids.iter().enumerate() {
            let angle = i as f32 * 0.15;
            let matches = index.query(&vector(&[angle.cos(), angle.sin(), 0.1 * i as f32]), 3);
            assert_eq!(matches[0].incident_id, *id);
            assert!((matches[0].score - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_results_sorted_and_bounded() {
        let index = SimilarityIndex::new(100);
        for i in 0..10 {
            index
                .insert(Uuid::new_v4(), vector(&[1.0, i as f32]), metadata("t"))
                .unwrap();
        }

        let matches = index.query(&vector(&[1.0, 0.0]), 4);
        assert_eq!(matches.len(), 4);
        for pair in matches.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert!(matches.iter().all(|m| (0.0..=1.0).contains(&m.score)));
        assert!(index.query(&vector(&[1.0, 0.0]), 0).is_empty());
    }

    #[test]
    fn test_ties_prefer_most_recent() {
        let index = SimilarityIndex::new(10);
        let older = Uuid::new_v4();
        let newer = Uuid::new_v4();
        index.insert(older, vector(&[1.0, 1.0]), metadata("older")).unwrap();
        index.insert(newer, vector(&[1.0, 1.0]), metadata("newer")).unwrap();

        let matches = index.query(&vector(&[1.0, 1.0]), 2);
        assert_eq!(matches[0].incident_id, newer);
        assert_eq!(matches[1].incident_id, older);
    }

    #[test]
    fn test_negative_similarity_clamped() {
        let index = SimilarityIndex::new(10);
        index.insert(Uuid::new_v4(), vector(&[-1.0, 0.0]), metadata("opposite")).unwrap();

        let matches = index.query(&vector(&[1.0, 0.0]), 1);
        assert_eq!(matches[0].score, 0.0);
    }

    #[test]
    fn test_fifo_eviction() {
        let index = SimilarityIndex::new(3);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            assert_eq!(
                index.insert(*id, vector(&[1.0, 0.0]), metadata("t")).unwrap(),
                InsertOutcome::Inserted
            );
        }

        let fourth = Uuid::new_v4();
        let outcome = index.insert(fourth, vector(&[0.0, 1.0]), metadata("t")).unwrap();

        assert_eq!(outcome, InsertOutcome::CapacityExceeded { evicted: vec![ids[0]] });
        assert_eq!(index.len(), 3);
        assert!(!index.contains(&ids[0]));
        assert!(index.contains(&fourth));
        assert_eq!(index.stats().evictions, 1);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let index = SimilarityIndex::new(10);
        index.insert(Uuid::new_v4(), vector(&[1.0, 0.0]), metadata("t")).unwrap();

        let err = index
            .insert(Uuid::new_v4(), vector(&[1.0, 0.0, 0.0]), metadata("t"))
            .unwrap_err();
        assert_eq!(err, IndexError::DimensionMismatch { expected: 2, actual: 3 });

        // querying with the wrong dimension is not an error
        assert!(index.query(&vector(&[1.0, 0.0, 0.0]), 5).is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let index = SimilarityIndex::new(10);
        let id = Uuid::new_v4();
        index.insert(id, vector(&[1.0]), metadata("t")).unwrap();
        assert_eq!(
            index.insert(id, vector(&[1.0]), metadata("t")).unwrap_err(),
            IndexError::DuplicateId(id)
        );
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_match_carries_metadata() {
        let index = SimilarityIndex::new(10);
        let id = Uuid::new_v4();
        index.insert(id, vector(&[0.3, 0.4]), metadata("GL import")).unwrap();

        let m = &index.query(&vector(&[0.3, 0.4]), 1)[0];
        assert_eq!(m.title, "GL import");
        assert_eq!(m.category, Category::DataIssue);
        assert_eq!(m.resolution.as_deref(), Some("Re-ran posting"));
    }

    #[test]
    fn test_concurrent_inserts_and_queries() {
        let index = Arc::new(SimilarityIndex::new(10_000));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        index
                            .insert(
                                Uuid::new_v4(),
                                vector(&[t as f32 + 1.0, i as f32, 1.0]),
                                metadata("t"),
                            )
                            .unwrap();
                        let matches = index.query(&vector(&[1.0, 1.0, 1.0]), 5);
                        assert!(matches.len() <= 5);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(index.len(), 800);
    }
}
