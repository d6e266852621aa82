//! ERP incident triage: rule-based classification with optional
//! retrieval-augmented re-classification over historical incidents.

pub mod config;
pub mod enrichment;
pub mod error;
pub mod metrics;
pub mod models;

pub use config::Config;
pub use enrichment::{EnrichmentConfig, EnrichmentOrchestrator};
pub use error::{AppError, Result};
