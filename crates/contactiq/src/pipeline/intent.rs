//! Intent classification.
//!
//! One structured-JSON judge call per turn, no retries. Output that fails
//! validation is coerced to `unknown`/`human_only`, which is stricter than the
//! judge honestly answering `unknown` (taxonomy category `automatable`).

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::PipelineConfig;
use crate::judge::{complete_with_timeout, parse_json_object, ChatMessage, Judge, JudgeRequest};
use crate::taxonomy;
use crate::types::{AssistantMode, ConversationTurn, IntentCategory, IntentResult};
use crate::validation::{sanitize_query_with_limit, validate_intent_output};

const CLASSIFIER_TEMPERATURE: f32 = 0.3;
/// Turns quoted inline in the user prompt.
const PROMPT_CONTEXT_TURNS: usize = 3;

pub struct IntentClassifier {
    judge: Arc<dyn Judge>,
    timeout: Duration,
    history_window: usize,
    max_query_chars: usize,
}

impl IntentClassifier {
    pub fn new(judge: Arc<dyn Judge>, config: &PipelineConfig) -> Self {
        Self {
            judge,
            timeout: config.call_timeout,
            history_window: config.classifier_history_window,
            max_query_chars: config.max_query_chars,
        }
    }

    /// Classify with a mode given as text. An unsupported mode yields `None`.
    pub async fn classify_for_mode(
        &self,
        query: &str,
        mode: &str,
        history: Option<&[ConversationTurn]>,
    ) -> Option<IntentResult> {
        match mode.parse::<AssistantMode>() {
            Ok(mode) => self.classify(query, mode, history).await,
            Err(e) => {
                tracing::error!(mode = %mode, error = %e, "Invalid assistant mode");
                None
            }
        }
    }

    /// `None` means classification failed outright: empty query, judge
    /// error or timeout, or output that is not a JSON object.
    pub async fn classify(
        &self,
        query: &str,
        mode: AssistantMode,
        history: Option<&[ConversationTurn]>,
    ) -> Option<IntentResult> {
        let start = Instant::now();
        let query = sanitize_query_with_limit(query, self.max_query_chars);
        if query.is_empty() {
            tracing::error!("Empty user query after sanitization");
            return None;
        }
        let preview: String = query.chars().take(50).collect();
        let history = history.unwrap_or(&[]);
        tracing::debug!(turns = history.len(), "Classifier history received");

        let request = JudgeRequest {
            messages: self.build_messages(&query, mode, history),
            temperature: CLASSIFIER_TEMPERATURE,
            max_tokens: None,
            structured_json: true,
        };

        let content =
            match complete_with_timeout(self.judge.as_ref(), &request, self.timeout, "intent_classification").await {
                Ok(result) => result.content,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        processing_time_ms = start.elapsed().as_millis() as u64,
                        query_preview = %preview,
                        "Intent classification failed"
                    );
                    return None;
                }
            };

        let Some(data) = parse_json_object(&content) else {
            let content_preview: String = content.chars().take(200).collect();
            tracing::error!(content_preview = %content_preview, "Failed to parse classifier JSON");
            return None;
        };

        let result = validate_intent_output(&data, mode).unwrap_or_else(|e| {
            tracing::error!(error = %e, query_preview = %preview, "Invalid intent classification");
            IntentResult {
                intent_name: "unknown".to_string(),
                intent_category: IntentCategory::HumanOnly,
                classification_reason: format!("Classification validation failed: {}", e),
            }
        });

        tracing::info!(
            intent = %result.intent_name,
            category = %result.intent_category,
            mode = %mode,
            processing_time_ms = start.elapsed().as_millis() as u64,
            query_len = query.chars().count(),
            "Intent classification completed"
        );
        Some(result)
    }

    fn build_messages(
        &self,
        query: &str,
        mode: AssistantMode,
        history: &[ConversationTurn],
    ) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(system_prompt(mode))];

        let window_start = history.len().saturating_sub(self.history_window);
        for turn in history[window_start..].iter().filter(|t| t.is_dialogue()) {
            messages.push(if turn.role == "user" {
                ChatMessage::user(turn.content.clone())
            } else {
                ChatMessage::assistant(turn.content.clone())
            });
        }

        messages.push(ChatMessage::user(format!(
            "{}Classify this query, considering the conversation context above: {}",
            conversation_context(history),
            query
        )));
        messages
    }
}

fn conversation_context(history: &[ConversationTurn]) -> String {
    let start = history.len().saturating_sub(PROMPT_CONTEXT_TURNS);
    let lines: Vec<String> = history[start..]
        .iter()
        .filter_map(|turn| match turn.role.as_str() {
            "user" => Some(format!("User: {}", turn.content)),
            "assistant" => Some(format!("Assistant: {}", turn.content)),
            _ => None,
        })
        .collect();

    if lines.is_empty() {
        String::new()
    } else {
        format!("\nPrevious conversation:\n{}\n\n", lines.join("\n"))
    }
}

fn system_prompt(mode: AssistantMode) -> String {
    let mut intents = String::new();
    for spec in taxonomy::taxonomy(mode) {
        let _ = writeln!(intents, "- {} ({}): {}", spec.name, spec.category, spec.description);
    }

    format!(
        r#"You are an intent classification system for a banking assistant.

Classify the user's query into exactly one of the predefined intents.

Available intents for {mode} mode:
{intents}
Intent categories:
- automatable: answerable from the knowledge base, including greetings and general conversation
- sensitive: needs authentication or careful handling
- human_only: must be handed to a human straight away

Special handling:
- Greetings (hi, hello, hey, good morning, ...) are "greeting" with category "automatable"
- A follow-up to an earlier banking topic keeps that topic's intent; do not fall back to "general_conversation"
- Use "general_conversation" only for off-topic or purely conversational queries
- A query that matches no intent but can be met with general guidance is "unknown" with category "automatable"
- Reserve "human_only" for queries that genuinely need a person (account access, financial advice, complaints)

Respond with a JSON object:
{{
    "intent_name": "<intent_name>",
    "intent_category": "<automatable|sensitive|human_only>",
    "classification_reason": "<brief explanation>"
}}"#
    )
}
