use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;
use validator::Validate;

use crate::error::Result;

/// A support-desk incident report as submitted by a user
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct Incident {
    /// Unique identifier
    pub id: Uuid,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Short human-readable title
    #[validate(length(min = 1, max = 200))]
    pub title: String,

    /// Free-text description
    #[validate(length(min = 1))]
    pub description: String,

    /// ERP module the report concerns
    pub erp_module: ErpModule,

    /// Environment the problem was observed in
    pub environment: Environment,

    /// Reporting business unit
    #[validate(length(min = 1, max = 100))]
    pub business_unit: String,
}

impl Incident {
    /// Create a new incident
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        erp_module: ErpModule,
        environment: Environment,
        business_unit: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            title: title.into(),
            description: description.into(),
            erp_module,
            environment,
            business_unit: business_unit.into(),
        }
    }

    /// Create a new incident and reject it if any field is out of bounds
    pub fn validated(
        title: impl Into<String>,
        description: impl Into<String>,
        erp_module: ErpModule,
        environment: Environment,
        business_unit: impl Into<String>,
    ) -> Result<Self> {
        let incident = Self::new(title, description, erp_module, environment, business_unit);
        incident.validate()?;
        Ok(incident)
    }

    /// Text sent to the embedding provider
    pub fn embedding_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.description)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display)]
pub enum ErpModule {
    AP,
    AR,
    GL,
    Inventory,
    HR,
    Payroll,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display)]
pub enum Environment {
    Prod,
    Test,
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, Display,
)]
pub enum Severity {
    P1, // Critical - escalate now
    P2, // Degraded - same day
    P3, // Low - queue
}

impl Severity {
    /// Get numeric priority (lower is more urgent)
    pub fn priority(&self) -> u8 {
        match self {
            Severity::P1 => 1,
            Severity::P2 => 2,
            Severity::P3 => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display)]
pub enum Category {
    #[serde(rename = "Configuration Issue")]
    #[strum(serialize = "Configuration Issue")]
    ConfigurationIssue,

    #[serde(rename = "Data Issue")]
    #[strum(serialize = "Data Issue")]
    DataIssue,

    #[serde(rename = "Integration Failure")]
    #[strum(serialize = "Integration Failure")]
    IntegrationFailure,

    #[serde(rename = "Security/Access", alias = "Security / Access")]
    #[strum(to_string = "Security/Access", serialize = "Security / Access")]
    SecurityAccess,

    #[serde(rename = "Unknown")]
    #[strum(serialize = "Unknown")]
    Unknown,
}
