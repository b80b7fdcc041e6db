//! Input sanitization and validation of judge-produced structured output.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::taxonomy;
use crate::types::{AssistantMode, IntentCategory, IntentResult};

/// Longest query forwarded downstream, in characters.
pub const MAX_QUERY_CHARS: usize = 2000;

const REQUIRED_INTENT_FIELDS: [&str; 3] = ["intent_name", "intent_category", "classification_reason"];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IntentValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("intent_name must be a string")]
    InvalidIntentName,
    #[error("Invalid intent_category: {0}. Must be one of: automatable, sensitive, human_only")]
    InvalidCategory(String),
    #[error("classification_reason must be a non-empty string")]
    EmptyReason,
}

/// Trim and cap a raw user query. An empty result means "nothing to classify".
pub fn sanitize_query(text: &str) -> String {
    sanitize_query_with_limit(text, MAX_QUERY_CHARS)
}

pub fn sanitize_query_with_limit(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    tracing::warn!(max_chars = max_chars, "User query truncated");
    trimmed.chars().take(max_chars).collect()
}

/// Check the classifier's JSON object and convert it into a typed result.
///
/// An intent name outside the mode's taxonomy is let through with a warning;
/// so is a category that disagrees with the taxonomy.
pub fn validate_intent_output(
    data: &Map<String, Value>,
    mode: AssistantMode,
) -> Result<IntentResult, IntentValidationError> {
    for field in REQUIRED_INTENT_FIELDS {
        if !data.contains_key(field) {
            return Err(IntentValidationError::MissingField(field));
        }
    }
    let extra: Vec<&String> = data
        .keys()
        .filter(|k| !REQUIRED_INTENT_FIELDS.contains(&k.as_str()))
        .collect();
    if !extra.is_empty() {
        tracing::debug!(fields = ?extra, "Ignoring extra classifier fields");
    }

    let intent_name = data["intent_name"]
        .as_str()
        .ok_or(IntentValidationError::InvalidIntentName)?
        .trim()
        .to_string();

    let raw_category = match &data["intent_category"] {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let intent_category: IntentCategory = raw_category
        .parse()
        .map_err(|_| IntentValidationError::InvalidCategory(raw_category.clone()))?;

    let classification_reason = match data["classification_reason"].as_str() {
        Some(reason) if !reason.trim().is_empty() => reason.trim().to_string(),
        _ => return Err(IntentValidationError::EmptyReason),
    };

    match taxonomy::expected_category(&intent_name, mode) {
        None => {
            tracing::warn!(intent = %intent_name, mode = %mode, "Unknown intent name");
        }
        Some(expected) if expected != intent_category => {
            tracing::warn!(
                intent = %intent_name,
                category = %intent_category,
                expected = %expected,
                "Intent category disagrees with taxonomy"
            );
        }
        Some(_) => {}
    }

    Ok(IntentResult {
        intent_name,
        intent_category,
        classification_reason,
    })
}

/// A confidence score is valid iff present, finite and within [0.0, 1.0].
pub fn validate_confidence(score: Option<f64>) -> bool {
    matches!(score, Some(s) if (0.0..=1.0).contains(&s))
}
