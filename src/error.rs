use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to an embedding provider
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    /// Provider could not be reached (DNS, connect, reset)
    #[error("Embedding provider unreachable: {0}")]
    Unreachable(String),

    /// Request exceeded its deadline
    #[error("Embedding request timed out after {0:?}")]
    Timeout(Duration),

    /// Provider answered with a non-success status
    #[error("Embedding provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },

    /// Response body did not contain a usable vector
    #[error("Malformed embedding response: {0}")]
    MalformedResponse(String),

    /// Client is missing credentials or endpoint
    #[error("Embedding client not configured: {0}")]
    NotConfigured(String),
}

impl EmbeddingError {
    /// Whether a single bounded retry may help
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Unreachable(_) => true,
            EmbeddingError::Provider { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Errors raised while classifying with a language model
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// Provider could not be reached
    #[error("LLM provider unreachable: {0}")]
    Unreachable(String),

    /// Request exceeded its deadline
    #[error("LLM request timed out after {0:?}")]
    Timeout(Duration),

    /// Provider answered with a non-success status
    #[error("LLM provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },

    /// Response content was not a JSON object
    #[error("Unparseable classification: {0}")]
    Unparseable(String),

    /// Required field absent or blank
    #[error("Classification missing required field '{0}'")]
    MissingField(&'static str),

    /// Field present but outside its closed domain
    #[error("Invalid value for '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },

    /// Classifier had nothing to base a decision on
    #[error("No similar incidents available for classification")]
    NoEvidence,

    /// Client is missing credentials or endpoint
    #[error("LLM client not configured: {0}")]
    NotConfigured(String),
}

impl LlmError {
    /// Whether a single bounded retry may help
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Unreachable(_) => true,
            LlmError::Provider { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Similarity index errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    /// Vector length differs from the index dimension
    #[error("Vector dimension mismatch: index holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Entry already present (entries are append-only)
    #[error("Incident {0} already indexed")]
    DuplicateId(uuid::Uuid),
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Embedding provider errors
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// LLM provider errors
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// Similarity index errors
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Embedding(_) => "EMBEDDING_ERROR",
            AppError::Llm(_) => "LLM_ERROR",
            AppError::Index(_) => "INDEX_ERROR",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Pipeline stage label used for failure accounting
    pub fn stage(&self) -> &'static str {
        match self {
            AppError::Embedding(_) => "embedding",
            AppError::Llm(_) => "llm",
            AppError::Index(_) => "index",
            AppError::Timeout(_) => "deadline",
            AppError::Configuration(_) => "configuration",
            AppError::Validation(_) => "validation",
            _ => "other",
        }
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from validator::ValidationErrors
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
