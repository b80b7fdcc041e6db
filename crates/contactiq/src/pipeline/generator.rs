//! Response generation with inline citations.
//!
//! Conversational intents get fixed text. Everything else is generated by the
//! judge from numbered evidence, then post-processed:
//! 1. raw `[file-...]` markers become public citation numbers
//! 2. `[n]` markers are collected, deduplicated and matched to citations
//! 3. a synthetic-content disclaimer is appended when evidence carries a marker

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use crate::backoff;
use crate::config::PipelineConfig;
use crate::judge::{complete_with_timeout, ChatMessage, Judge, JudgeRequest};
use crate::types::{AssistantMode, Citation, ConversationTurn};

static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("citation regex is valid"));
static FILE_CITATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[file-([a-zA-Z0-9_-]+)\]").expect("file citation regex is valid")
});

pub const SYNTHETIC_MARKERS: [&str; 3] = [
    "SYNTHETIC CONTENT",
    "Label: SYNTHETIC",
    "Content Type: synthetic",
];

pub const SYNTHETIC_DISCLAIMER: &str =
    "Note: This information is based on synthetic content and may not reflect official ANZ policy.";

const GENERATION_TEMPERATURE: f32 = 0.7;
const GENERATION_MAX_TOKENS: u32 = 1000;

const CUSTOMER_GREETING: &str =
    "Hello! I'm here to help you with ANZ banking questions. How can I assist you today?";
const BANKER_GREETING: &str =
    "Hello! I'm here to help you with policy lookups and process questions. What can I help you with?";

const CUSTOMER_GUIDANCE: &str = "I'm not entirely sure what you're looking for, but I can help with:

• **Account questions**: Fees, limits, transactions, applications
• **Product information**: Cards, accounts, loans, savings
• **Process guidance**: How to apply, dispute processes, card issues

Could you rephrase your question, or tell me what you'd like to know about? I can also connect you with our customer service team if you prefer.";

const BANKER_GUIDANCE: &str = "I'm not entirely sure what you're looking for, but I can help with:

• **Policy lookups**: Terms, conditions, bank policies
• **Process clarification**: Workflows, procedures, compliance
• **Product information**: Features, eligibility, documentation requirements

Could you rephrase your question, or specify what you'd like to know? I can also suggest escalating to a specialist team if needed.";

const GENERAL_CONVERSATION_FALLBACK: &str = "I'm here to help! Could you let me know what specific information you're looking for? I can assist with ANZ banking questions, product information, and processes.";

const INSUFFICIENT_INFORMATION: &str = "I don't have enough information to answer your question. Could you rephrase it, or would you like me to connect you with ANZ customer service?";

const CUSTOMER_SYSTEM_PROMPT: &str = r#"You are a helpful banking assistant for ANZ customers.

Explain ANZ banking products, services and processes in clear, simple language.

Guidelines:
- Keep explanations easy to understand
- Cite sources with numbered references [1], [2], [3] whenever you use information from the context
- If any context is marked "SYNTHETIC CONTENT" or "Label: SYNTHETIC", say: "Note: This information is based on synthetic content and may not reflect official ANZ policy."
- Use only the provided context and never invent information
- If the context is not enough to answer, say so plainly
- Focus on what the customer needs to know"#;

const BANKER_SYSTEM_PROMPT: &str = r#"You are an internal banking assistant for ANZ staff.

Give frontline bankers and contact centre agents technical, policy-focused answers.

Guidelines:
- Be precise about policy details and process steps
- Always cite sources with numbered references [1], [2], [3] so answers can be verified
- If any context is marked "SYNTHETIC CONTENT" or "Label: SYNTHETIC", say: "Note: This information is based on synthetic content."
- Emphasise compliance and accuracy
- Use only the provided context
- If the context is not enough to answer, say so plainly"#;

#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub query: &'a str,
    pub evidence: &'a [String],
    pub mode: AssistantMode,
    pub intent_name: Option<&'a str>,
    pub citations: &'a [Citation],
    pub history: &'a [ConversationTurn],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedResponse {
    pub response_text: String,
    pub citations: Vec<Citation>,
    pub has_synthetic_content: bool,
    pub response_generation_time_ms: u64,
}

impl GeneratedResponse {
    fn canned(text: &str, started: Instant) -> Self {
        Self {
            response_text: text.to_string(),
            citations: Vec::new(),
            has_synthetic_content: false,
            response_generation_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

pub fn greeting_text(mode: AssistantMode) -> &'static str {
    match mode {
        AssistantMode::Customer => CUSTOMER_GREETING,
        AssistantMode::Banker => BANKER_GREETING,
    }
}

pub fn guidance_text(mode: AssistantMode) -> &'static str {
    match mode {
        AssistantMode::Customer => CUSTOMER_GUIDANCE,
        AssistantMode::Banker => BANKER_GUIDANCE,
    }
}

pub struct ResponseGenerator {
    judge: Arc<dyn Judge>,
    timeout: Duration,
    max_attempts: u32,
    backoff_base: Duration,
    history_window: usize,
}

impl ResponseGenerator {
    pub fn new(judge: Arc<dyn Judge>, config: &PipelineConfig) -> Self {
        Self {
            judge,
            timeout: config.call_timeout,
            max_attempts: config.judge_max_retries,
            backoff_base: config.judge_backoff_base,
            history_window: config.generator_history_window,
        }
    }

    /// `None` only when every judge attempt failed.
    pub async fn generate(&self, request: GenerationRequest<'_>) -> Option<GeneratedResponse> {
        let started = Instant::now();
        tracing::info!(
            mode = %request.mode,
            intent = ?request.intent_name,
            chunks = request.evidence.len(),
            "response_generation_started"
        );

        match request.intent_name {
            Some("greeting") => return Some(GeneratedResponse::canned(greeting_text(request.mode), started)),
            Some("unknown") => return Some(GeneratedResponse::canned(guidance_text(request.mode), started)),
            _ => {}
        }

        if request.evidence.is_empty() {
            tracing::warn!(mode = %request.mode, intent = ?request.intent_name, "No evidence for generation");
            let text = if request.intent_name == Some("general_conversation") {
                GENERAL_CONVERSATION_FALLBACK
            } else {
                INSUFFICIENT_INFORMATION
            };
            return Some(GeneratedResponse::canned(text, started));
        }

        let judge_request = JudgeRequest {
            messages: self.build_messages(&request),
            temperature: GENERATION_TEMPERATURE,
            max_tokens: Some(GENERATION_MAX_TOKENS),
            structured_json: false,
        };

        for attempt in 0..self.max_attempts {
            match complete_with_timeout(self.judge.as_ref(), &judge_request, self.timeout, "response_generation").await {
                Ok(result) => {
                    let response = finish_response(&result.content, &request, started);
                    tracing::info!(
                        mode = %request.mode,
                        response_len = response.response_text.len(),
                        citations = response.citations.len(),
                        has_synthetic_content = response.has_synthetic_content,
                        processing_time_ms = response.response_generation_time_ms,
                        "response_generation_completed"
                    );
                    return Some(response);
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "Response generation attempt failed");
                }
            }
            if attempt + 1 < self.max_attempts {
                tokio::time::sleep(backoff::exponential(self.backoff_base, attempt)).await;
            }
        }

        tracing::error!(
            attempts = self.max_attempts,
            processing_time_ms = started.elapsed().as_millis() as u64,
            "Response generation failed"
        );
        None
    }

    fn build_messages(&self, request: &GenerationRequest<'_>) -> Vec<ChatMessage> {
        let system = match request.mode {
            AssistantMode::Customer => CUSTOMER_SYSTEM_PROMPT,
            AssistantMode::Banker => BANKER_SYSTEM_PROMPT,
        };
        let mut messages = vec![ChatMessage::system(system)];

        let start = request.history.len().saturating_sub(self.history_window);
        for turn in request.history[start..].iter().filter(|t| t.is_dialogue()) {
            messages.push(if turn.role == "user" {
                ChatMessage::user(turn.content.clone())
            } else {
                ChatMessage::assistant(turn.content.clone())
            });
        }

        messages.push(ChatMessage::user(format!(
            "User Query: {}\n\nContext:\n{}",
            request.query,
            format_context(request.evidence)
        )));
        messages
    }
}

fn finish_response(raw: &str, request: &GenerationRequest<'_>, started: Instant) -> GeneratedResponse {
    let mut text = replace_file_citations(raw, request.citations);
    let citations = extract_citations(&text, request.citations);
    let has_synthetic_content = has_synthetic_marker(request.evidence);
    if has_synthetic_content && !text.to_lowercase().contains("synthetic content") {
        text.push_str("\n\n");
        text.push_str(SYNTHETIC_DISCLAIMER);
    }

    GeneratedResponse {
        response_text: text,
        citations,
        has_synthetic_content,
        response_generation_time_ms: started.elapsed().as_millis() as u64,
    }
}

/// `[1] chunk`, one per chunk, blank line between.
pub fn format_context(evidence: &[String]) -> String {
    evidence
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("[{}] {}\n", i + 1, chunk))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Swap `[file-xyz]` markers for the citation number that carries that id.
/// Unmapped markers are left as they are.
pub fn replace_file_citations(text: &str, citations: &[Citation]) -> String {
    let by_file_id: HashMap<&str, u32> = citations
        .iter()
        .filter_map(|c| c.source_id.as_deref().map(|id| (id, c.number)))
        .collect();
    if by_file_id.is_empty() {
        return text.to_string();
    }

    FILE_CITATION_RE
        .replace_all(text, |caps: &regex::Captures| {
            let file_id = format!("file-{}", &caps[1]);
            match by_file_id.get(file_id.as_str()) {
                Some(number) => format!("[{}]", number),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Citations referenced by `[n]` markers, ascending and unique. Numbers with
/// no matching record get a placeholder.
pub fn extract_citations(text: &str, available: &[Citation]) -> Vec<Citation> {
    let numbers: BTreeSet<u32> = CITATION_RE
        .captures_iter(text)
        .filter_map(|cap| cap[1].parse::<u32>().ok())
        .filter(|n| *n > 0)
        .collect();

    numbers
        .into_iter()
        .map(|n| {
            available
                .iter()
                .find(|c| c.number == n)
                .cloned()
                .unwrap_or_else(|| Citation::placeholder(n))
        })
        .collect()
}

pub fn has_synthetic_marker(evidence: &[String]) -> bool {
    evidence
        .iter()
        .any(|chunk| SYNTHETIC_MARKERS.iter().any(|marker| chunk.contains(marker)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::JudgeError;
    use crate::testing::ScriptedJudge;

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            judge_backoff_base: Duration::from_millis(1),
            ..PipelineConfig::default()
        }
    }

    fn citation(number: u32, file_id: &str) -> Citation {
        Citation {
            number,
            source_id: Some(file_id.to_string()),
            quote: None,
            source: format!("Doc {}", number),
            url: Some(format!("https://example.com/{}", number)),
        }
    }

    fn request<'a>(
        evidence: &'a [String],
        citations: &'a [Citation],
        intent: Option<&'a str>,
    ) -> GenerationRequest<'a> {
        GenerationRequest {
            query: "What is the fee?",
            evidence,
            mode: AssistantMode::Customer,
            intent_name: intent,
            citations,
            history: &[],
        }
    }

    #[test]
    fn test_citation_markers_are_deduplicated_in_order() {
        let available = vec![citation(1, "file-a"), citation(2, "file-b")];
        let found = extract_citations("See [2] and [1], also [1] again.", &available);
        assert_eq!(found.iter().map(|c| c.number).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(found[0].source, "Doc 1");
    }

    #[test]
    fn test_unknown_citation_gets_placeholder() {
        let found = extract_citations("Per [3].", &[]);
        assert_eq!(found, vec![Citation::placeholder(3)]);
    }

    #[test]
    fn test_file_markers_are_renumbered() {
        let available = vec![citation(1, "file-abc_1"), citation(2, "file-xyz")];
        let text = replace_file_citations("Fee is $5 [file-xyz], see [file-nope].", &available);
        assert_eq!(text, "Fee is $5 [2], see [file-nope].");
    }

    #[test]
    fn test_context_format() {
        let evidence = vec!["alpha".to_string(), "beta".to_string()];
        assert_eq!(format_context(&evidence), "[1] alpha\n\n[2] beta\n");
    }

    #[tokio::test]
    async fn test_greeting_and_unknown_skip_the_judge() {
        let judge = Arc::new(ScriptedJudge::new());
        let generator = ResponseGenerator::new(judge.clone(), &fast_config());

        let greeting = generator.generate(request(&[], &[], Some("greeting"))).await.unwrap();
        assert_eq!(greeting.response_text, CUSTOMER_GREETING);

        let mut banker = request(&[], &[], Some("unknown"));
        banker.mode = AssistantMode::Banker;
        let guidance = generator.generate(banker).await.unwrap();
        assert!(guidance.response_text.contains("**Policy lookups**"));

        assert!(judge.requests().is_empty());
    }

    #[tokio::test]
    async fn test_empty_evidence_fallbacks() {
        let judge = Arc::new(ScriptedJudge::new());
        let generator = ResponseGenerator::new(judge.clone(), &fast_config());

        let chat = generator
            .generate(request(&[], &[], Some("general_conversation")))
            .await
            .unwrap();
        assert!(chat.response_text.starts_with("I'm here to help!"));

        let fees = generator.generate(request(&[], &[], Some("fee_inquiry"))).await.unwrap();
        assert_eq!(fees.response_text, INSUFFICIENT_INFORMATION);
        assert!(judge.requests().is_empty());
    }

    #[tokio::test]
    async fn test_synthetic_disclaimer_appended_once() {
        let evidence = vec!["SYNTHETIC CONTENT\nMonthly fee is $5.".to_string()];
        let available = vec![citation(1, "file-a")];

        let judge = Arc::new(ScriptedJudge::new().reply("The monthly fee is $5 [1]."));
        let generator = ResponseGenerator::new(judge, &fast_config());
        let response = generator
            .generate(request(&evidence, &available, Some("fee_inquiry")))
            .await
            .unwrap();
        assert!(response.has_synthetic_content);
        assert!(response.response_text.ends_with(SYNTHETIC_DISCLAIMER));
        assert_eq!(response.citations.len(), 1);

        let judge = Arc::new(
            ScriptedJudge::new().reply("Fee is $5 [1]. Note: based on Synthetic Content."),
        );
        let generator = ResponseGenerator::new(judge, &fast_config());
        let response = generator
            .generate(request(&evidence, &available, Some("fee_inquiry")))
            .await
            .unwrap();
        assert!(response.has_synthetic_content);
        assert_eq!(response.response_text.to_lowercase().matches("synthetic content").count(), 1);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let evidence = vec!["Fee is $5.".to_string()];
        let judge = Arc::new(
            ScriptedJudge::new()
                .fail(JudgeError::Transport("reset".into()))
                .reply("")
                .reply("It is $5 [1]."),
        );
        let generator = ResponseGenerator::new(judge.clone(), &fast_config());
        let response = generator
            .generate(request(&evidence, &[], Some("fee_inquiry")))
            .await
            .unwrap();

        assert_eq!(response.response_text, "It is $5 [1].");
        assert_eq!(judge.requests().len(), 3);
        let requests = judge.requests();
        let prompt = &requests[0].messages.last().unwrap().content;
        assert_eq!(prompt, "User Query: What is the fee?\n\nContext:\n[1] Fee is $5.\n");
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_none() {
        let evidence = vec!["Fee is $5.".to_string()];
        let judge = Arc::new(ScriptedJudge::new());
        let generator = ResponseGenerator::new(judge.clone(), &fast_config());
        assert!(generator
            .generate(request(&evidence, &[], Some("fee_inquiry")))
            .await
            .is_none());
        assert_eq!(judge.requests().len(), 3);
    }
}
