//! Text-completion judge boundary.
//!
//! The classifier, generator and scorer all talk to a language model through
//! the [`Judge`] trait. Providers return a typed [`JudgeResult`] so nothing
//! downstream has to probe for optional response attributes.

pub mod openai;

pub use openai::OpenAiJudge;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::interaction_log::{log_api_call, ApiCallRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Ask the provider for a strict JSON object.
    #[serde(default)]
    pub structured_json: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeResult {
    pub content: String,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("judge call timed out after {0:?}")]
    Timeout(Duration),
    #[error("judge transport error: {0}")]
    Transport(String),
    #[error("judge returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed judge response: {0}")]
    Malformed(String),
    #[error("judge returned empty content")]
    Empty,
}

#[async_trait]
pub trait Judge: Send + Sync {
    async fn complete(&self, request: &JudgeRequest) -> Result<JudgeResult, JudgeError>;
}

/// Run one judge call under `timeout`, rejecting blank output and emitting an
/// API-call log event either way.
pub async fn complete_with_timeout(
    judge: &dyn Judge,
    request: &JudgeRequest,
    timeout: Duration,
    api_name: &str,
) -> Result<JudgeResult, JudgeError> {
    let start = Instant::now();
    let outcome = match tokio::time::timeout(timeout, judge.complete(request)).await {
        Err(_) => Err(JudgeError::Timeout(timeout)),
        Ok(Err(e)) => Err(e),
        Ok(Ok(result)) if result.content.trim().is_empty() => Err(JudgeError::Empty),
        Ok(Ok(result)) => Ok(result),
    };
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let mut record = ApiCallRecord::new(api_name);
    record.processing_time_ms = Some(elapsed_ms);
    match &outcome {
        Ok(result) => {
            record.model = result.model.clone();
            record.request_tokens = Some(result.usage.prompt_tokens);
            record.response_tokens = Some(result.usage.completion_tokens);
            record.total_tokens = Some(result.usage.total_tokens);
        }
        Err(e) => {
            if let JudgeError::Status { status, .. } = e {
                record.status_code = Some(*status);
            }
            record.error = Some(e.to_string());
        }
    }
    log_api_call(&record);

    outcome
}

/// Pull a JSON object out of judge output.
/// Handles common LLM quirks: markdown fences, leading/trailing prose.
pub fn parse_json_object(raw: &str) -> Option<Map<String, Value>> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let json_str = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => &cleaned[start..=end],
        _ => cleaned,
    };

    match serde_json::from_str::<Value>(json_str) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "Judge output is not a JSON object");
            None
        }
    }
}
