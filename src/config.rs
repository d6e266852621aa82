use serde::{Deserialize, Serialize};
use std::path::Path;
use strum::{Display, EnumString};

use crate::enrichment::EnrichmentConfig;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Decision policy
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Embedding provider
    #[serde(default)]
    pub embedding: EmbeddingProviderConfig,

    /// Language model provider
    #[serde(default)]
    pub llm: LlmProviderConfig,

    /// Similarity index sizing
    #[serde(default)]
    pub index: IndexConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path = std::env::var("CONFIG_PATH")
            .unwrap_or_else(|_| "config/erp-triage.toml".to_string());
        Self::load_from(&config_path)
    }

    /// Load configuration layering defaults, the given file (if present) and environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            // Override with config file if it exists
            .add_source(config::File::from(path.as_ref()).required(false))
            // Override with environment variables (prefix: ERP_TRIAGE)
            .add_source(
                config::Environment::with_prefix("ERP_TRIAGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enrichment: EnrichmentConfig::default(),
            embedding: EmbeddingProviderConfig::default(),
            llm: LlmProviderConfig::default(),
            index: IndexConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingProviderConfig {
    /// API base URL (OpenAI-compatible)
    #[serde(default = "default_provider_url")]
    pub base_url: String,

    /// Embedding model
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Expected vector length; responses of any other length are rejected
    pub dimensions: Option<usize>,

    /// Request timeout (seconds)
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Delay before the single retry of a transient failure (milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for EmbeddingProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            model: default_embedding_model(),
            api_key_env: default_api_key_env(),
            dimensions: Some(1536),
            timeout_secs: default_embedding_timeout(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Classifier used on the RAG path
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LlmBackend {
    /// OpenAI-compatible chat completions
    #[default]
    #[serde(rename = "openai")]
    #[strum(serialize = "openai")]
    OpenAi,
    /// Weighted vote over the retrieved incidents; no model call
    MajorityVote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    /// Which classifier handles retrieved context
    #[serde(default)]
    pub provider: LlmBackend,

    /// API base URL (OpenAI-compatible)
    #[serde(default = "default_provider_url")]
    pub base_url: String,

    /// Chat model
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout (seconds)
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Delay before the single retry of a transient failure (milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self {
            provider: LlmBackend::default(),
            base_url: default_provider_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Maximum number of vectors kept before FIFO eviction
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Service name
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            service_name: default_service_name(),
            prometheus_enabled: true,
        }
    }
}

/// Read an API key from the named environment variable, ignoring blanks
pub fn api_key_from_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|key| !key.trim().is_empty())
}

// Default value functions
fn default_provider_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_embedding_timeout() -> u64 {
    5
}

fn default_llm_timeout() -> u64 {
    15
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_max_entries() -> usize {
    50_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "erp-incident-triage".to_string()
}

fn default_true() -> bool {
    true
}
