use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::{api_key_from_env, EmbeddingProviderConfig};
use crate::enrichment::provider::{ProviderHttp, PROVIDER_LABEL};
use crate::error::EmbeddingError;
use crate::metrics::observe_provider_call;
use crate::models::EmbeddingVector;

/// Turns incident text into fixed-length vectors
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError>;

    /// Embed several texts, preserving input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    index: Option<usize>,
}

/// Put batch results in input order. Providers that omit `index` are taken
/// to answer in request order.
fn order_by_index(mut data: Vec<EmbeddingDatum>) -> Result<Vec<EmbeddingDatum>, EmbeddingError> {
    if data.iter().all(|datum| datum.index.is_none()) {
        return Ok(data);
    }
    if data.iter().any(|datum| datum.index.is_none()) {
        return Err(EmbeddingError::MalformedResponse(
            "embedding index missing on some items".to_string(),
        ));
    }

    data.sort_by_key(|datum| datum.index);
    if data
        .iter()
        .enumerate()
        .any(|(i, datum)| datum.index != Some(i))
    {
        return Err(EmbeddingError::MalformedResponse(
            "embedding indices are not contiguous".to_string(),
        ));
    }
    Ok(data)
}

/// Client for an OpenAI-compatible `/embeddings` endpoint
#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    http: ProviderHttp,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbeddingClient {
    /// Create a client. `dimensions`, when set, is enforced on every response.
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: impl Into<String>,
        dimensions: Option<usize>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::NotConfigured("API key is empty".to_string()));
        }

        let http = ProviderHttp::new(base_url, api_key, timeout).map_err(|e| {
            EmbeddingError::NotConfigured(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            http,
            model: model.into(),
            dimensions,
        })
    }

    /// Build from configuration, reading the key from the configured env var
    pub fn from_config(config: &EmbeddingProviderConfig) -> Result<Self, EmbeddingError> {
        let api_key = api_key_from_env(&config.api_key_env).ok_or_else(|| {
            EmbeddingError::NotConfigured(format!("{} is not set", config.api_key_env))
        })?;

        Self::new(
            &config.base_url,
            config.model.clone(),
            api_key,
            config.dimensions,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request(&self, input: serde_json::Value) -> Result<Vec<EmbeddingDatum>, EmbeddingError> {
        let payload = json!({
            "model": self.model,
            "input": input,
        });

        let started = Instant::now();
        let result = self.send(&payload).await;
        observe_provider_call(
            PROVIDER_LABEL,
            "embed",
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );
        result
    }

    async fn send(&self, payload: &serde_json::Value) -> Result<Vec<EmbeddingDatum>, EmbeddingError> {
        let body = self.http.post_json("embeddings", payload).await?;

        let response: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| EmbeddingError::MalformedResponse(e.to_string()))?;

        Ok(response.data)
    }

    fn validate(&self, values: Vec<f32>) -> Result<EmbeddingVector, EmbeddingError> {
        if values.is_empty() {
            return Err(EmbeddingError::MalformedResponse("empty embedding".to_string()));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::MalformedResponse(
                "embedding contains non-finite values".to_string(),
            ));
        }
        if values.iter().all(|v| *v == 0.0) {
            return Err(EmbeddingError::MalformedResponse("zero embedding".to_string()));
        }
        if let Some(expected) = self.dimensions {
            if values.len() != expected {
                return Err(EmbeddingError::MalformedResponse(format!(
                    "expected {} dimensions, got {}",
                    expected,
                    values.len()
                )));
            }
        }

        Ok(EmbeddingVector::new(values))
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        let mut data = self.request(json!(text)).await?;

        if data.len() != 1 {
            return Err(EmbeddingError::MalformedResponse(format!(
                "expected 1 embedding, got {}",
                data.len()
            )));
        }

        let vector = self.validate(data.remove(0).embedding)?;
        debug!(
            model = %self.model,
            dimensions = vector.dimensions(),
            "Embedding generated"
        );
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let data = self.request(json!(texts)).await?;

        if data.len() != texts.len() {
            return Err(EmbeddingError::MalformedResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }

        let vectors = order_by_index(data)?
            .into_iter()
            .map(|datum| self.validate(datum.embedding))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(model = %self.model, count = vectors.len(), "Batch embeddings generated");
        Ok(vectors)
    }
}
