//! Prometheus metrics for the enrichment engine.
//!
//! Collectors are process-global and cheap to update; call [`init_metrics`]
//! once at startup to register them and [`gather_metrics`] to export the
//! text exposition format.
//!
//! # Example
//! ```no_run
//! use erp_incident_triage::metrics::{self, ENRICHMENTS_TOTAL};
//!
//! metrics::init_metrics().ok();
//! ENRICHMENTS_TOTAL.with_label_values(&["rule"]).inc();
//! println!("{}", metrics::gather_metrics());
//! ```

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry};

const NAMESPACE: &str = "erp_incident_triage";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Enrichment Metrics
    // ============================================================================

    /// Total number of enrichment results produced
    ///
    /// Labels: source (rule/rag)
    pub static ref ENRICHMENTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("enrichments_total", "Total number of enrichment results produced")
            .namespace(NAMESPACE),
        &["source"]
    ).expect("Failed to create ENRICHMENTS_TOTAL metric");

    /// End-to-end enrichment duration in seconds
    ///
    /// Labels: source
    pub static ref ENRICHMENT_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "enrichment_duration_seconds",
            "End-to-end enrichment duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.0005, 0.001, 0.01, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["source"]
    ).expect("Failed to create ENRICHMENT_DURATION_SECONDS metric");

    /// RAG attempts that fell back to the rule result
    ///
    /// Labels: stage (embedding, index, llm, deadline, configuration)
    pub static ref RAG_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("rag_failures_total", "RAG attempts that fell back to rule classification")
            .namespace(NAMESPACE),
        &["stage"]
    ).expect("Failed to create RAG_FAILURES_TOTAL metric");

    // ============================================================================
    // Provider Metrics
    // ============================================================================

    /// Total number of external provider requests
    ///
    /// Labels: provider, operation (embed/classify), status (ok/error)
    pub static ref PROVIDER_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("provider_requests_total", "Total number of external provider requests")
            .namespace(NAMESPACE),
        &["provider", "operation", "status"]
    ).expect("Failed to create PROVIDER_REQUESTS_TOTAL metric");

    /// External provider request duration in seconds
    ///
    /// Labels: provider, operation
    pub static ref PROVIDER_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "provider_request_duration_seconds",
            "External provider request duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0]),
        &["provider", "operation"]
    ).expect("Failed to create PROVIDER_REQUEST_DURATION_SECONDS metric");

    // ============================================================================
    // Index Metrics
    // ============================================================================

    /// Number of vectors currently held by the similarity index
    pub static ref SIMILARITY_INDEX_ENTRIES: Gauge = Gauge::with_opts(
        Opts::new("similarity_index_entries", "Vectors held by the similarity index")
            .namespace(NAMESPACE)
    ).expect("Failed to create SIMILARITY_INDEX_ENTRIES metric");

    /// Vectors evicted because the index reached capacity
    pub static ref SIMILARITY_INDEX_EVICTIONS_TOTAL: Counter = Counter::with_opts(
        Opts::new("similarity_index_evictions_total", "Vectors evicted at index capacity")
            .namespace(NAMESPACE)
    ).expect("Failed to create SIMILARITY_INDEX_EVICTIONS_TOTAL metric");
}

/// Register all collectors with [`PROMETHEUS_REGISTRY`].
///
/// # Errors
/// Fails if called twice in the same process (duplicate registration).
pub fn init_metrics() -> Result<(), prometheus::Error> {
    PROMETHEUS_REGISTRY.register(Box::new(ENRICHMENTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(ENRICHMENT_DURATION_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(RAG_FAILURES_TOTAL.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(PROVIDER_REQUESTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(PROVIDER_REQUEST_DURATION_SECONDS.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(SIMILARITY_INDEX_ENTRIES.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(SIMILARITY_INDEX_EVICTIONS_TOTAL.clone()))?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Encode registered metrics in the Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}

/// Record one provider call outcome and its latency
pub fn observe_provider_call(provider: &str, operation: &str, ok: bool, seconds: f64) {
    let status = if ok { "ok" } else { "error" };
    PROVIDER_REQUESTS_TOTAL
        .with_label_values(&[provider, operation, status])
        .inc();
    PROVIDER_REQUEST_DURATION_SECONDS
        .with_label_values(&[provider, operation])
        .observe(seconds);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_registration_rejected() {
        let _ = init_metrics();
        assert!(init_metrics().is_err());
    }

    #[test]
    fn test_enrichment_counter() {
        ENRICHMENTS_TOTAL.with_label_values(&["rule"]).inc();
        assert!(ENRICHMENTS_TOTAL.with_label_values(&["rule"]).get() >= 1.0);
    }

    #[test]
    fn test_observe_provider_call() {
        observe_provider_call("unit-test", "embed", false, 0.02);
        assert!(
            PROVIDER_REQUESTS_TOTAL
                .with_label_values(&["unit-test", "embed", "error"])
                .get()
                >= 1.0
        );
    }

    #[test]
    fn test_gather_metrics() {
        let _ = init_metrics();
        ENRICHMENTS_TOTAL.with_label_values(&["rag"]).inc();
        let output = gather_metrics();
        assert!(output.contains("erp_incident_triage_enrichments_total"));
    }
}
