use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use validator::Validate;

use crate::config::{Config, LlmBackend};
use crate::enrichment::corpus::{CorpusEntry, HistoricalCorpus};
use crate::enrichment::embedding::{EmbeddingClient, OpenAiEmbeddingClient};
use crate::enrichment::llm::{
    LlmClassification, LlmClassifier, MajorityVoteClassifier, OpenAiLlmClassifier,
};
use crate::enrichment::models::{EnrichmentConfig, EnrichmentReport, RagState};
use crate::enrichment::rules::RuleClassifier;
use crate::error::{AppError, EmbeddingError, LlmError, Result};
use crate::metrics::{ENRICHMENTS_TOTAL, ENRICHMENT_DURATION_SECONDS, RAG_FAILURES_TOTAL};
use crate::models::{
    EmbeddingVector, EnrichmentResult, EnrichmentSource, Incident, SimilarityMatch,
};

/// Delay before the single retry of a transient provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBackoff {
    pub embedding: Duration,
    pub llm: Duration,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            embedding: Duration::from_millis(250),
            llm: Duration::from_millis(250),
        }
    }
}

/// Hybrid enrichment: rule classification first, optional retrieval-augmented
/// re-classification, rule result as the fallback floor.
pub struct EnrichmentOrchestrator {
    rules: RuleClassifier,
    corpus: Arc<dyn HistoricalCorpus>,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    classifier: Option<Arc<dyn LlmClassifier>>,
    backoff: RetryBackoff,
}

impl EnrichmentOrchestrator {
    /// Create a rules-only orchestrator over the given corpus
    pub fn new(corpus: Arc<dyn HistoricalCorpus>) -> Self {
        Self {
            rules: RuleClassifier::new(),
            corpus,
            embedder: None,
            classifier: None,
            backoff: RetryBackoff::default(),
        }
    }

    /// Attach the clients used by the RAG path
    pub fn with_rag(
        mut self,
        embedder: Arc<dyn EmbeddingClient>,
        classifier: Arc<dyn LlmClassifier>,
    ) -> Self {
        self.embedder = Some(embedder);
        self.classifier = Some(classifier);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Wire provider clients from configuration.
    ///
    /// Fails with [`AppError::Configuration`] when RAG is enabled but a
    /// provider cannot be configured (typically a missing API key).
    pub fn from_config(config: &Config, corpus: Arc<dyn HistoricalCorpus>) -> Result<Self> {
        config.enrichment.validate()?;

        let backoff = RetryBackoff {
            embedding: Duration::from_millis(config.embedding.retry_backoff_ms),
            llm: Duration::from_millis(config.llm.retry_backoff_ms),
        };
        let mut orchestrator = Self::new(corpus).with_retry_backoff(backoff);

        if config.enrichment.use_rag {
            let embedder = OpenAiEmbeddingClient::from_config(&config.embedding)
                .map_err(|e| AppError::Configuration(e.to_string()))?;
            let classifier: Arc<dyn LlmClassifier> = match config.llm.provider {
                LlmBackend::OpenAi => {
                    let classifier = OpenAiLlmClassifier::from_config(&config.llm)
                        .map_err(|e| AppError::Configuration(e.to_string()))?;
                    info!(llm_model = %classifier.model(), "Using LLM classifier");
                    Arc::new(classifier)
                }
                LlmBackend::MajorityVote => Arc::new(MajorityVoteClassifier::new()),
            };

            info!(
                embedding_model = %embedder.model(),
                llm_provider = %config.llm.provider,
                "RAG enrichment enabled"
            );
            orchestrator = orchestrator.with_rag(Arc::new(embedder), classifier);
        }

        Ok(orchestrator)
    }

    pub fn corpus(&self) -> &Arc<dyn HistoricalCorpus> {
        &self.corpus
    }

    /// Whether both RAG clients are attached
    pub fn rag_configured(&self) -> bool {
        self.embedder.is_some() && self.classifier.is_some()
    }

    /// Enrich an incident. Never fails: RAG problems fall back to rules.
    pub async fn enrich(&self, incident: &Incident, config: &EnrichmentConfig) -> EnrichmentResult {
        self.enrich_with_report(incident, config).await.result
    }

    /// Enrich an incident and report how the result was reached
    pub async fn enrich_with_report(
        &self,
        incident: &Incident,
        config: &EnrichmentConfig,
    ) -> EnrichmentReport {
        let start = Instant::now();

        let rule = self.rules.classify(incident);
        debug!(
            incident_id = %incident.id,
            severity = %rule.severity,
            category = %rule.category,
            confidence = rule.confidence,
            "Rule classification complete"
        );

        let mut embedding = None;
        let (result, rag_state, rag_failure) = if !config.should_use_rag(rule.confidence) {
            (rule.to_result(), RagState::RagSkipped, None)
        } else {
            debug!(incident_id = %incident.id, state = %RagState::RagInProgress, "Running RAG enrichment");
            match self.run_rag_with_deadline(incident, config, &mut embedding).await {
                Ok(result) => (result, RagState::RagClassified, None),
                Err(e) => {
                    self.record_failure(incident, &e);
                    (rule.to_result(), RagState::RagFailed, Some(e.to_string()))
                }
            }
        };

        self.append_to_corpus(incident, embedding, &result).await;
        self.observe(&result, start);

        info!(
            incident_id = %incident.id,
            severity = %result.severity,
            category = %result.category,
            source = %result.source,
            rag_state = %rag_state,
            similar = result.similar_incidents.len(),
            "Incident enriched"
        );

        EnrichmentReport {
            result,
            rag_state,
            rag_failure,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Run the RAG path unconditionally and surface its failures instead
    /// of falling back to rules
    pub async fn enrich_rag_only(
        &self,
        incident: &Incident,
        config: &EnrichmentConfig,
    ) -> Result<EnrichmentResult> {
        let start = Instant::now();
        let mut embedding = None;

        match self.run_rag_with_deadline(incident, config, &mut embedding).await {
            Ok(result) => {
                self.append_to_corpus(incident, embedding, &result).await;
                self.observe(&result, start);
                Ok(result)
            }
            Err(e) => {
                self.record_failure(incident, &e);
                Err(e)
            }
        }
    }

    async fn run_rag_with_deadline(
        &self,
        incident: &Incident,
        config: &EnrichmentConfig,
        embedding: &mut Option<EmbeddingVector>,
    ) -> Result<EnrichmentResult> {
        config.validate()?;
        let deadline = config.rag_deadline();

        match timeout(deadline, self.run_rag(incident, config, deadline, embedding)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "RAG enrichment exceeded {} seconds",
                config.rag_timeout_secs
            ))),
        }
    }

    async fn run_rag(
        &self,
        incident: &Incident,
        config: &EnrichmentConfig,
        budget: Duration,
        embedding: &mut Option<EmbeddingVector>,
    ) -> Result<EnrichmentResult> {
        let (embedder, classifier) = match (&self.embedder, &self.classifier) {
            (Some(embedder), Some(classifier)) => (embedder, classifier),
            _ => {
                return Err(AppError::Configuration(
                    "RAG clients are not configured".to_string(),
                ))
            }
        };
        let deadline = Instant::now() + budget;

        let text = incident.embedding_text();
        let vector = call_with_retry(
            deadline,
            self.backoff.embedding,
            EmbeddingError::is_transient,
            || embedder.embed(&text),
        )
        .await?;
        *embedding = Some(vector.clone());

        let mut matches: Vec<SimilarityMatch> = self
            .corpus
            .query(&vector, config.rag_max_similar)
            .await?
            .into_iter()
            .filter(|m| m.score >= config.rag_min_similarity)
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(config.rag_max_similar);

        debug!(
            incident_id = %incident.id,
            matches = matches.len(),
            "Similar incidents retrieved"
        );

        let classification = call_with_retry(
            deadline,
            self.backoff.llm,
            LlmError::is_transient,
            || classifier.classify(incident, &matches),
        )
        .await?;

        Ok(merge(classification, matches))
    }

    fn record_failure(&self, incident: &Incident, error: &AppError) {
        RAG_FAILURES_TOTAL.with_label_values(&[error.stage()]).inc();
        warn!(
            incident_id = %incident.id,
            stage = error.stage(),
            error = %error,
            "RAG enrichment failed, using rule classification"
        );
    }

    async fn append_to_corpus(
        &self,
        incident: &Incident,
        embedding: Option<EmbeddingVector>,
        result: &EnrichmentResult,
    ) {
        let entry = CorpusEntry::from_enrichment(incident.clone(), embedding, result);
        if let Err(e) = self.corpus.append(entry).await {
            warn!(
                incident_id = %incident.id,
                error = %e,
                "Failed to append incident to historical corpus"
            );
        }
    }

    fn observe(&self, result: &EnrichmentResult, start: Instant) {
        let source = result.source.to_string();
        ENRICHMENTS_TOTAL.with_label_values(&[source.as_str()]).inc();
        ENRICHMENT_DURATION_SECONDS
            .with_label_values(&[source.as_str()])
            .observe(start.elapsed().as_secs_f64());
    }
}

/// RAG classification supersedes the rule result
fn merge(classification: LlmClassification, matches: Vec<SimilarityMatch>) -> EnrichmentResult {
    EnrichmentResult {
        severity: classification.severity,
        category: classification.category,
        summary: classification.summary,
        suggested_action: classification.suggested_action,
        confidence: classification.confidence.clamp(0.0, 1.0),
        source: EnrichmentSource::Rag,
        similar_incidents: matches,
        enriched_at: Utc::now(),
    }
}

/// Run `call`, retrying once after `backoff` when the failure is transient
/// and the retry still fits before `deadline`.
async fn call_with_retry<T, E, F, Fut>(
    deadline: Instant,
    backoff: Duration,
    is_transient: fn(&E) -> bool,
    mut call: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    match call().await {
        Err(e) if is_transient(&e) && deadline.saturating_duration_since(Instant::now()) > backoff => {
            warn!(
                error = %e,
                backoff_ms = backoff.as_millis() as u64,
                "Transient provider failure, retrying once"
            );
            sleep(backoff).await;
            call().await
        }
        outcome => outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::corpus::InMemoryCorpus;
    use crate::models::{Category, Environment, ErpModule, Severity};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticEmbedder;

    #[async_trait]
    impl EmbeddingClient for StaticEmbedder {
        async fn embed(&self, _text: &str) -> std::result::Result<EmbeddingVector, EmbeddingError> {
            Ok(EmbeddingVector::new(vec![1.0, 0.0, 0.0]))
        }
    }

    /// Fails with the given error a fixed number of times, then succeeds
    struct FlakyEmbedder {
        failures: usize,
        error: EmbeddingError,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingClient for FlakyEmbedder {
        async fn embed(&self, _text: &str) -> std::result::Result<EmbeddingVector, EmbeddingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(self.error.clone())
            } else {
                Ok(EmbeddingVector::new(vec![1.0, 0.0, 0.0]))
            }
        }
    }

    struct FixedClassifier;

    #[async_trait]
    impl LlmClassifier for FixedClassifier {
        async fn classify(
            &self,
            _incident: &Incident,
            _matches: &[SimilarityMatch],
        ) -> std::result::Result<LlmClassification, LlmError> {
            Ok(LlmClassification {
                severity: Severity::P2,
                category: Category::IntegrationFailure,
                summary: "Bank feed rejected".to_string(),
                suggested_action: "Re-run the bank import".to_string(),
                confidence: 0.85,
            })
        }
    }

    fn create_test_incident() -> Incident {
        Incident::new(
            "Bank statement",
            "Statement lines not matched to open items.",
            ErpModule::GL,
            Environment::Prod,
            "Treasury",
        )
    }

    fn rag_config() -> EnrichmentConfig {
        EnrichmentConfig {
            use_rag: true,
            rag_force_all: true,
            ..Default::default()
        }
    }

    fn fast_backoff() -> RetryBackoff {
        RetryBackoff {
            embedding: Duration::from_millis(1),
            llm: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_rules_only_when_rag_disabled() {
        let corpus = Arc::new(InMemoryCorpus::new(10));
        let orchestrator = EnrichmentOrchestrator::new(corpus.clone())
            .with_rag(Arc::new(StaticEmbedder), Arc::new(FixedClassifier));

        let report = orchestrator
            .enrich_with_report(&create_test_incident(), &EnrichmentConfig::default())
            .await;

        assert_eq!(report.result.source, EnrichmentSource::Rule);
        assert_eq!(report.rag_state, RagState::RagSkipped);
        assert!(report.rag_failure.is_none());
        assert_eq!(corpus.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rag_result_supersedes_rules() {
        let orchestrator = EnrichmentOrchestrator::new(Arc::new(InMemoryCorpus::new(10)))
            .with_rag(Arc::new(StaticEmbedder), Arc::new(FixedClassifier));

        let report = orchestrator
            .enrich_with_report(&create_test_incident(), &rag_config())
            .await;

        assert_eq!(report.rag_state, RagState::RagClassified);
        assert_eq!(report.result.source, EnrichmentSource::Rag);
        assert_eq!(report.result.category, Category::IntegrationFailure);
        assert_eq!(report.result.confidence, 0.85);
    }

    #[tokio::test]
    async fn test_missing_clients_fall_back() {
        let orchestrator = EnrichmentOrchestrator::new(Arc::new(InMemoryCorpus::new(10)));
        assert!(!orchestrator.rag_configured());

        let report = orchestrator
            .enrich_with_report(&create_test_incident(), &rag_config())
            .await;

        assert_eq!(report.rag_state, RagState::RagFailed);
        assert_eq!(report.result.source, EnrichmentSource::Rule);
        assert!(report.rag_failure.unwrap().contains("not configured"));
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let embedder = Arc::new(FlakyEmbedder {
            failures: 1,
            error: EmbeddingError::Provider { status: 503, message: "busy".into() },
            calls: AtomicUsize::new(0),
        });
        let orchestrator = EnrichmentOrchestrator::new(Arc::new(InMemoryCorpus::new(10)))
            .with_rag(embedder.clone(), Arc::new(FixedClassifier))
            .with_retry_backoff(fast_backoff());

        let result = orchestrator.enrich(&create_test_incident(), &rag_config()).await;

        assert_eq!(result.source, EnrichmentSource::Rag);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistent_transient_failure_not_retried_twice() {
        let embedder = Arc::new(FlakyEmbedder {
            failures: 5,
            error: EmbeddingError::Unreachable("refused".into()),
            calls: AtomicUsize::new(0),
        });
        let orchestrator = EnrichmentOrchestrator::new(Arc::new(InMemoryCorpus::new(10)))
            .with_rag(embedder.clone(), Arc::new(FixedClassifier))
            .with_retry_backoff(fast_backoff());

        let result = orchestrator.enrich(&create_test_incident(), &rag_config()).await;

        assert_eq!(result.source, EnrichmentSource::Rule);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let embedder = Arc::new(FlakyEmbedder {
            failures: 1,
            error: EmbeddingError::Provider { status: 401, message: "bad key".into() },
            calls: AtomicUsize::new(0),
        });
        let orchestrator = EnrichmentOrchestrator::new(Arc::new(InMemoryCorpus::new(10)))
            .with_rag(embedder.clone(), Arc::new(FixedClassifier))
            .with_retry_backoff(fast_backoff());

        let report = orchestrator
            .enrich_with_report(&create_test_incident(), &rag_config())
            .await;

        assert_eq!(report.rag_state, RagState::RagFailed);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_skipped_when_backoff_exceeds_deadline() {
        let embedder = Arc::new(FlakyEmbedder {
            failures: 1,
            error: EmbeddingError::Unreachable("reset".into()),
            calls: AtomicUsize::new(0),
        });
        let orchestrator = EnrichmentOrchestrator::new(Arc::new(InMemoryCorpus::new(10)))
            .with_rag(embedder.clone(), Arc::new(FixedClassifier))
            .with_retry_backoff(RetryBackoff {
                embedding: Duration::from_secs(60),
                llm: Duration::from_secs(60),
            });

        let result = orchestrator.enrich(&create_test_incident(), &rag_config()).await;

        assert_eq!(result.source, EnrichmentSource::Rule);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_from_config_rules_only() {
        let config = Config::default();
        let orchestrator =
            EnrichmentOrchestrator::from_config(&config, Arc::new(InMemoryCorpus::new(10)))
                .unwrap();
        assert!(!orchestrator.rag_configured());
    }

    #[tokio::test]
    async fn test_from_config_requires_key_for_rag() {
        let mut config = Config::default();
        config.enrichment.use_rag = true;
        config.embedding.api_key_env = "ERP_TRIAGE_TEST_UNSET_EMBEDDING_KEY".to_string();

        let result =
            EnrichmentOrchestrator::from_config(&config, Arc::new(InMemoryCorpus::new(10)));
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid_policy() {
        let mut config = Config::default();
        config.enrichment.rag_confidence_threshold = 2.0;

        let result =
            EnrichmentOrchestrator::from_config(&config, Arc::new(InMemoryCorpus::new(10)));
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
