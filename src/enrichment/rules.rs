//! Deterministic keyword classifier.
//!
//! Severity and category are chosen by walking ordered ladders of
//! `(outcome, keywords)` rules; the first rule with a matching keyword wins.
//! A keyword matches when it occurs at the start of a word in the lower-cased
//! `title + " " + description`, so `api` matches "APIs" but not "rapid".

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::{Category, EnrichmentResult, EnrichmentSource, Incident, Severity};

/// Confidence when both ladders matched a rule
pub const CONFIDENCE_FULL_MATCH: f64 = 0.9;
/// Confidence when only one ladder matched
pub const CONFIDENCE_PARTIAL_MATCH: f64 = 0.6;
/// Confidence when neither ladder matched
pub const CONFIDENCE_NO_MATCH: f64 = 0.5;

const SUMMARY_SENTENCE_MAX_CHARS: usize = 100;

/// One rung of a keyword ladder
#[derive(Debug, Clone, Copy)]
pub struct KeywordRule<T: 'static> {
    pub outcome: T,
    pub keywords: &'static [&'static str],
}

/// Severity ladder, most urgent first
pub const SEVERITY_RULES: &[KeywordRule<Severity>] = &[
    KeywordRule {
        outcome: Severity::P1,
        keywords: &[
            "critical",
            "down",
            "outage",
            "stuck",
            "blocked",
            "cannot process",
            "complete failure",
            "not working",
            "broken",
            "urgent",
            "emergency",
            "all users affected",
        ],
    },
    KeywordRule {
        outcome: Severity::P2,
        keywords: &[
            "slow",
            "delay",
            "performance",
            "lagging",
            "timeout",
            "intermittent",
            "some users",
            "degraded",
            "partial",
            "reduced functionality",
        ],
    },
];

/// Category ladder; order is the tie-break when several groups co-occur
pub const CATEGORY_RULES: &[KeywordRule<Category>] = &[
    KeywordRule {
        outcome: Category::IntegrationFailure,
        keywords: &[
            "integration",
            "api",
            "webhook",
            "connection",
            "sync",
            "import",
            "export",
            "interface",
            "endpoint",
            "service",
            "external system",
        ],
    },
    KeywordRule {
        outcome: Category::SecurityAccess,
        keywords: &[
            "access",
            "permission",
            "authentication",
            "authorization",
            "login",
            "password",
            "credential",
            "security",
            "unauthorized",
            "forbidden",
            "user cannot",
            "locked out",
            "access denied",
        ],
    },
    KeywordRule {
        outcome: Category::DataIssue,
        keywords: &[
            "data",
            "duplicate",
            "missing",
            "incorrect",
            "wrong",
            "corrupt",
            "invalid",
            "error in data",
            "mismatch",
            "record",
            "transaction",
        ],
    },
    KeywordRule {
        outcome: Category::ConfigurationIssue,
        keywords: &[
            "configuration",
            "config",
            "setting",
            "setup",
            "parameter",
            "misconfigured",
            "wrong setting",
            "incorrect config",
        ],
    },
];

/// Winning rule and the keyword that triggered it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleMatch<T> {
    pub outcome: T,
    pub term: &'static str,
}

/// Output of the rule classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleClassification {
    pub severity: Severity,
    pub category: Category,
    pub summary: String,
    pub suggested_action: String,
    pub confidence: f64,

    /// Keyword that decided severity (`None` means default P3)
    pub severity_term: Option<String>,

    /// Keyword that decided category (`None` means Unknown)
    pub category_term: Option<String>,
}

impl RuleClassification {
    /// Convert into a rule-sourced enrichment result
    pub fn to_result(&self) -> EnrichmentResult {
        EnrichmentResult {
            severity: self.severity,
            category: self.category,
            summary: self.summary.clone(),
            suggested_action: self.suggested_action.clone(),
            confidence: self.confidence,
            source: EnrichmentSource::Rule,
            similar_incidents: Vec::new(),
            enriched_at: Utc::now(),
        }
    }
}

/// Keyword-ladder classifier. Pure and total.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleClassifier;

impl RuleClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify an incident
    pub fn classify(&self, incident: &Incident) -> RuleClassification {
        let text = format!("{} {}", incident.title, incident.description).to_lowercase();

        let severity_match = first_match(SEVERITY_RULES, &text);
        let category_match = first_match(CATEGORY_RULES, &text);

        let severity = severity_match.map_or(Severity::P3, |m| m.outcome);
        let category = category_match.map_or(Category::Unknown, |m| m.outcome);

        RuleClassification {
            severity,
            category,
            summary: summarize(incident),
            suggested_action: suggest_action(severity, category).to_string(),
            confidence: confidence_for(severity_match.is_some(), category_match.is_some()),
            severity_term: severity_match.map(|m| m.term.to_string()),
            category_term: category_match.map(|m| m.term.to_string()),
        }
    }
}

/// Walk a ladder in order and return the first rule with a matching keyword
pub fn first_match<T: Copy>(rules: &[KeywordRule<T>], text: &str) -> Option<RuleMatch<T>> {
    rules.iter().find_map(|rule| {
        rule.keywords
            .iter()
            .copied()
            .find(|term| contains_term(text, term))
            .map(|term| RuleMatch {
                outcome: rule.outcome,
                term,
            })
    })
}

fn contains_term(text: &str, term: &str) -> bool {
    text.match_indices(term).any(|(pos, _)| {
        text[..pos]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}

/// `"{title}: {first sentence}"`, sentence capped at 100 characters
pub fn summarize(incident: &Incident) -> String {
    let first_sentence = incident
        .description
        .split('.')
        .next()
        .unwrap_or_default()
        .trim();

    let first_sentence = if first_sentence.chars().count() > SUMMARY_SENTENCE_MAX_CHARS {
        let truncated: String = first_sentence
            .chars()
            .take(SUMMARY_SENTENCE_MAX_CHARS - 3)
            .collect();
        format!("{}...", truncated)
    } else {
        first_sentence.to_string()
    };

    format!("{}: {}", incident.title, first_sentence)
}

/// Canned next step for a severity/category pair
pub fn suggest_action(severity: Severity, category: Category) -> &'static str {
    if severity == Severity::P1 {
        return "Immediate escalation required. Contact on-call engineer.";
    }

    match category {
        Category::IntegrationFailure => {
            "Check integration logs and verify external system connectivity."
        }
        Category::SecurityAccess => "Review user permissions and verify access configuration.",
        Category::DataIssue => "Investigate data integrity and verify transaction logs.",
        Category::ConfigurationIssue => {
            "Review system configuration settings and compare with baseline."
        }
        Category::Unknown => "Review incident details and assign to appropriate team.",
    }
}

fn confidence_for(severity_matched: bool, category_matched: bool) -> f64 {
    match (severity_matched, category_matched) {
        (true, true) => CONFIDENCE_FULL_MATCH,
        (false, false) => CONFIDENCE_NO_MATCH,
        _ => CONFIDENCE_PARTIAL_MATCH,
    }
}
