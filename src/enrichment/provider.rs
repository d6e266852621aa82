use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::error::{EmbeddingError, LlmError};

/// Label used for provider metrics
pub const PROVIDER_LABEL: &str = "openai";

const MAX_ERROR_BODY: usize = 300;

/// Transport-level failure of a provider call, before it is mapped into
/// the caller's error type
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HttpFailure {
    Timeout(Duration),
    Unreachable(String),
    Status { status: u16, message: String },
}

/// JSON-over-HTTPS client for an OpenAI-compatible API
#[derive(Clone)]
pub(crate) struct ProviderHttp {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl ProviderHttp {
    pub(crate) fn new(
        base_url: &str,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("erp-incident-triage/0.1")
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST a JSON payload and return the raw body of a 2xx response
    pub(crate) async fn post_json(&self, path: &str, payload: &Value) -> Result<String, HttpFailure> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !status.is_success() {
            return Err(HttpFailure::Status {
                status: status.as_u16(),
                message: provider_message(&body),
            });
        }

        Ok(body)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> HttpFailure {
        if e.is_timeout() {
            HttpFailure::Timeout(self.timeout)
        } else {
            HttpFailure::Unreachable(e.to_string())
        }
    }
}

/// Extract `error.message` from an OpenAI-style error body, else a
/// shortened copy of the body
fn provider_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => "No response body".to_string(),
        None => body.chars().take(MAX_ERROR_BODY).collect(),
    }
}

impl From<HttpFailure> for EmbeddingError {
    fn from(failure: HttpFailure) -> Self {
        match failure {
            HttpFailure::Timeout(after) => EmbeddingError::Timeout(after),
            HttpFailure::Unreachable(msg) => EmbeddingError::Unreachable(msg),
            HttpFailure::Status { status, message } => EmbeddingError::Provider { status, message },
        }
    }
}

impl From<HttpFailure> for LlmError {
    fn from(failure: HttpFailure) -> Self {
        match failure {
            HttpFailure::Timeout(after) => LlmError::Timeout(after),
            HttpFailure::Unreachable(msg) => LlmError::Unreachable(msg),
            HttpFailure::Status { status, message } => LlmError::Provider { status, message },
        }
    }
}
