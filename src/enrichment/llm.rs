use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::{api_key_from_env, LlmProviderConfig};
use crate::enrichment::provider::{ProviderHttp, PROVIDER_LABEL};
use crate::enrichment::rules::summarize;
use crate::error::LlmError;
use crate::metrics::observe_provider_call;
use crate::models::{Category, Incident, Severity, SimilarityMatch};

const SYSTEM_PROMPT: &str = "You are an expert at classifying ERP incidents. \
Analyze incidents and classify them accurately based on similar past incidents. \
Return only valid JSON.";

/// Longest resolution excerpt quoted per similar incident
const RESOLUTION_EXCERPT_CHARS: usize = 200;

/// Structured classification returned by a language model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmClassification {
    pub severity: Severity,
    pub category: Category,
    pub summary: String,
    pub suggested_action: String,
    pub confidence: f64,
}

/// Classifies an incident using retrieved similar incidents as context
#[async_trait]
pub trait LlmClassifier: Send + Sync {
    async fn classify(
        &self,
        incident: &Incident,
        matches: &[SimilarityMatch],
    ) -> Result<LlmClassification, LlmError>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint
#[derive(Clone)]
pub struct OpenAiLlmClassifier {
    http: ProviderHttp,
    model: String,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiLlmClassifier {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::NotConfigured("API key is empty".to_string()));
        }

        let http = ProviderHttp::new(base_url, api_key, timeout)
            .map_err(|e| LlmError::NotConfigured(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            model: model.into(),
            temperature,
        })
    }

    /// Build from configuration, reading the key from the configured env var
    pub fn from_config(config: &LlmProviderConfig) -> Result<Self, LlmError> {
        let api_key = api_key_from_env(&config.api_key_env)
            .ok_or_else(|| LlmError::NotConfigured(format!("{} is not set", config.api_key_env)))?;

        Self::new(
            &config.base_url,
            config.model.clone(),
            api_key,
            config.temperature,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: String) -> Result<String, LlmError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
        });

        let body = self.http.post_json("chat/completions", &payload).await?;

        let response: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::Unparseable(format!("invalid completion body: {}", e)))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Unparseable("completion has no message content".to_string()))
    }
}

#[async_trait]
impl LlmClassifier for OpenAiLlmClassifier {
    async fn classify(
        &self,
        incident: &Incident,
        matches: &[SimilarityMatch],
    ) -> Result<LlmClassification, LlmError> {
        let started = Instant::now();
        let result = match self.complete(build_user_prompt(incident, matches)).await {
            Ok(content) => parse_classification(&content),
            Err(e) => Err(e),
        };
        observe_provider_call(
            PROVIDER_LABEL,
            "classify",
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );

        if let Ok(classification) = &result {
            debug!(
                incident_id = %incident.id,
                model = %self.model,
                severity = %classification.severity,
                category = %classification.category,
                matches = matches.len(),
                "LLM classification received"
            );
        }
        result
    }
}

/// Render the retrieved incidents as prompt context
pub fn build_context(matches: &[SimilarityMatch]) -> String {
    if matches.is_empty() {
        return "No similar incidents were found in the history.".to_string();
    }

    matches
        .iter()
        .map(|m| {
            let mut part = String::new();
            let _ = writeln!(part, "Similar Incident (similarity: {:.2}):", m.score);
            let _ = writeln!(part, "Title: {}", m.title);
            let _ = writeln!(part, "Category: {}", m.category);
            let _ = writeln!(part, "Severity: {}", m.severity);
            let _ = writeln!(part, "Suggested Action: {}", m.suggested_action);
            if let Some(resolution) = &m.resolution {
                let excerpt: String = resolution.chars().take(RESOLUTION_EXCERPT_CHARS).collect();
                let _ = writeln!(part, "Resolution: {}", excerpt);
            }
            part
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

/// User prompt for one incident
pub fn build_user_prompt(incident: &Incident, matches: &[SimilarityMatch]) -> String {
    format!(
        "Analyze this new ERP incident and classify it based on similar past incidents.

NEW INCIDENT:
Title: {title}
Description: {description}
ERP Module: {module}
Environment: {environment}
Business Unit: {business_unit}

SIMILAR PAST INCIDENTS (for reference):
{context}

Based on the new incident and similar past incidents, classify:
1. Severity: P1 (critical/urgent), P2 (medium), or P3 (low)
2. Category: Configuration Issue, Data Issue, Integration Failure, Security/Access, or Unknown

Return JSON format:
{{
    \"severity\": \"P1|P2|P3\",
    \"category\": \"Configuration Issue|Data Issue|Integration Failure|Security/Access|Unknown\",
    \"summary\": \"One-line summary of the incident\",
    \"suggested_action\": \"Concrete next step for the support team\",
    \"confidence\": 0.0
}}
",
        title = incident.title,
        description = incident.description,
        module = incident.erp_module,
        environment = incident.environment,
        business_unit = incident.business_unit,
        context = build_context(matches),
    )
}

/// Strictly parse a model response into a classification.
///
/// Every field is required; enumerations must match exactly and
/// `confidence` must be a number in `[0, 1]`.
pub fn parse_classification(content: &str) -> Result<LlmClassification, LlmError> {
    let value: Value =
        serde_json::from_str(content.trim()).map_err(|e| LlmError::Unparseable(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| LlmError::Unparseable("expected a JSON object".to_string()))?;

    let severity_raw = required_str(object, "severity")?;
    let severity = Severity::from_str(severity_raw).map_err(|_| LlmError::InvalidValue {
        field: "severity",
        value: severity_raw.to_string(),
    })?;

    let category_raw = required_str(object, "category")?;
    let category = Category::from_str(category_raw).map_err(|_| LlmError::InvalidValue {
        field: "category",
        value: category_raw.to_string(),
    })?;

    let summary = required_str(object, "summary")?.to_string();
    let suggested_action = required_str(object, "suggested_action")?.to_string();

    let confidence = match object.get("confidence") {
        None | Some(Value::Null) => return Err(LlmError::MissingField("confidence")),
        Some(raw) => raw
            .as_f64()
            .filter(|c| c.is_finite() && (0.0..=1.0).contains(c))
            .ok_or_else(|| LlmError::InvalidValue {
                field: "confidence",
                value: raw.to_string(),
            })?,
    };

    Ok(LlmClassification {
        severity,
        category,
        summary,
        suggested_action,
        confidence,
    })
}

fn required_str<'a>(object: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, LlmError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(LlmError::MissingField(field)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(LlmError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.trim()),
        Some(other) => Err(LlmError::InvalidValue {
            field,
            value: other.to_string(),
        }),
    }
}

/// Offline classifier: score-weighted vote over the retrieved incidents
#[derive(Debug, Clone, Copy, Default)]
pub struct MajorityVoteClassifier;

impl MajorityVoteClassifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LlmClassifier for MajorityVoteClassifier {
    async fn classify(
        &self,
        incident: &Incident,
        matches: &[SimilarityMatch],
    ) -> Result<LlmClassification, LlmError> {
        if matches.is_empty() {
            return Err(LlmError::NoEvidence);
        }

        let (severity, _) = heaviest(matches.iter().map(|m| (m.severity, m.score)))
            .ok_or(LlmError::NoEvidence)?;
        let (category, category_weight) = heaviest(matches.iter().map(|m| (m.category, m.score)))
            .ok_or(LlmError::NoEvidence)?;
        let total: f64 = matches.iter().map(|m| m.score).sum();

        let confidence = if total > 0.0 {
            (category_weight / total).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Ok(LlmClassification {
            severity,
            category,
            summary: summarize(incident),
            suggested_action: majority_action(matches),
            confidence,
        })
    }
}

/// Key with the largest summed weight; ties go to the key seen first
fn heaviest<K: Copy + Eq + std::hash::Hash>(
    votes: impl Iterator<Item = (K, f64)>,
) -> Option<(K, f64)> {
    let mut order = Vec::new();
    let mut weights: HashMap<K, f64> = HashMap::new();
    for (key, weight) in votes {
        let entry = weights.entry(key).or_insert_with(|| {
            order.push(key);
            0.0
        });
        *entry += weight;
    }

    order.into_iter().fold(None, |best, key| {
        let weight = weights[&key];
        match best {
            Some((_, best_weight)) if best_weight >= weight => best,
            _ => Some((key, weight)),
        }
    })
}

fn majority_action(matches: &[SimilarityMatch]) -> String {
    let actions = matches
        .iter()
        .map(|m| m.suggested_action.trim())
        .filter(|a| !a.is_empty());
    let mut order = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for action in actions {
        let count = counts.entry(action).or_insert_with(|| {
            order.push(action);
            0
        });
        *count += 1;
    }

    let most_common = order
        .iter()
        .copied()
        .fold(None::<(&str, usize)>, |best, action| {
            let count = counts[action];
            match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((action, count)),
            }
        });

    match most_common {
        Some((action, _)) => format!(
            "{} (Based on {} similar resolved incidents)",
            action,
            matches.len()
        ),
        None => "Review incident details and assign to appropriate team.".to_string(),
    }
}
