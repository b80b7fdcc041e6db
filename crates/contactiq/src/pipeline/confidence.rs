//! Judge self-assessment of a generated answer.
//!
//! `score` is total: any failure yields a zero-confidence assessment that
//! does not meet the threshold.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use crate::backoff;
use crate::config::PipelineConfig;
use crate::judge::{complete_with_timeout, parse_json_object, ChatMessage, Judge, JudgeError, JudgeRequest};
use crate::types::AssistantMode;

const SCORER_TEMPERATURE: f32 = 0.3;
const SUMMARY_CHUNKS: usize = 5;
const SUMMARY_CHUNK_CHARS: usize = 200;

const SCORER_SYSTEM_PROMPT: &str =
    "You are a confidence assessment assistant. Analyze responses and provide confidence scores as JSON.";

static SCORE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)"confidence"\s*:\s*(-?[0-9.]+)"#,
        r#"(?i)"confidence_score"\s*:\s*(-?[0-9.]+)"#,
        r#"(?i)"score"\s*:\s*(-?[0-9.]+)"#,
        r"(?i)confidence[:\s]+(-?[0-9.]+)",
        r"(-?[0-9]\.[0-9]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("confidence pattern is valid"))
    .collect()
});
static REASONING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"reasoning"\s*:\s*"([^"]+)""#).expect("reasoning regex is valid")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceAssessment {
    pub confidence_score: f64,
    pub meets_threshold: bool,
    pub threshold_value: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq)]
struct ParsedScore {
    confidence: f64,
    reasoning: String,
}

type ScoreParser = fn(&str) -> Option<ParsedScore>;

/// Tried in order; the first strategy to produce a score wins.
const PARSERS: [(&str, ScoreParser); 2] = [("json", parse_structured), ("regex", parse_textual)];

pub struct ConfidenceScorer {
    judge: Arc<dyn Judge>,
    threshold: f64,
    timeout: Duration,
    max_attempts: u32,
    backoff_base: Duration,
}

impl ConfidenceScorer {
    pub fn new(judge: Arc<dyn Judge>, config: &PipelineConfig) -> Self {
        Self {
            judge,
            threshold: config.confidence_threshold,
            timeout: config.call_timeout,
            max_attempts: config.judge_max_retries,
            backoff_base: config.judge_backoff_base,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub async fn score(
        &self,
        response_text: &str,
        evidence: &[String],
        query: &str,
        mode: Option<AssistantMode>,
    ) -> ConfidenceAssessment {
        let started = Instant::now();
        let request = JudgeRequest {
            messages: vec![
                ChatMessage::system(SCORER_SYSTEM_PROMPT),
                ChatMessage::user(scoring_prompt(query, response_text, &context_summary(evidence))),
            ],
            temperature: SCORER_TEMPERATURE,
            max_tokens: None,
            structured_json: true,
        };

        let mut failure = String::from("all_retries_failed");
        for attempt in 0..self.max_attempts {
            match complete_with_timeout(self.judge.as_ref(), &request, self.timeout, "confidence_scoring").await {
                Ok(result) => match parse_score(&result.content) {
                    Some(parsed) => {
                        let assessment = self.assess(parsed);
                        let processing_time_ms = started.elapsed().as_millis() as u64;
                        if assessment.meets_threshold {
                            tracing::info!(
                                score = assessment.confidence_score,
                                threshold = self.threshold,
                                processing_time_ms,
                                mode = ?mode.map(|m| m.as_str()),
                                "confidence_scoring_completed"
                            );
                        } else {
                            tracing::warn!(
                                score = assessment.confidence_score,
                                threshold = self.threshold,
                                reasoning = %assessment.reasoning,
                                processing_time_ms,
                                "low_confidence_score"
                            );
                        }
                        return assessment;
                    }
                    None => {
                        tracing::warn!(attempt = attempt + 1, "Could not parse a confidence score");
                        failure = String::from("all_retries_failed");
                    }
                },
                Err(JudgeError::Timeout(_)) => {
                    tracing::error!(attempt = attempt + 1, timeout = ?self.timeout, "Confidence scoring timed out");
                    failure = String::from("timeout");
                }
                Err(e) => {
                    tracing::error!(attempt = attempt + 1, error = %e, "Confidence scoring failed");
                    failure = format!("error: {}", e);
                }
            }
            if attempt + 1 < self.max_attempts {
                tokio::time::sleep(backoff::exponential(self.backoff_base, attempt)).await;
            }
        }

        self.fail_safe(&failure)
    }

    fn assess(&self, parsed: ParsedScore) -> ConfidenceAssessment {
        ConfidenceAssessment {
            confidence_score: parsed.confidence,
            meets_threshold: parsed.confidence >= self.threshold,
            threshold_value: self.threshold,
            reasoning: parsed.reasoning,
        }
    }

    fn fail_safe(&self, reason: &str) -> ConfidenceAssessment {
        tracing::error!(reason = %reason, "Defaulting to low confidence");
        ConfidenceAssessment {
            confidence_score: 0.0,
            meets_threshold: false,
            threshold_value: self.threshold,
            reasoning: format!(
                "Confidence scoring failed: {}. Defaulting to low confidence for safety.",
                reason
            ),
        }
    }
}

fn scoring_prompt(query: &str, response_text: &str, summary: &str) -> String {
    format!(
        r#"On a scale of 0.0 to 1.0, how confident are you that the response below answers the user's query accurately, based only on the retrieved context?

Weigh these criteria:
1. **Completeness**: does the response fully address the query?
2. **Accuracy**: is every statement supported by the context?
3. **Relevance**: does the response stick to what was asked?
4. **Information Availability**: is everything needed actually present in the context?

User Query: {query}

Response: {response_text}

Retrieved Context Summary: {summary}

Respond with ONLY a JSON object in this format:
{{
    "confidence": 0.85,
    "reasoning": "Brief explanation of your confidence level"
}}

Scale: 0.0-0.3 very low, 0.3-0.5 low, 0.5-0.7 moderate, 0.7-0.9 high, 0.9-1.0 very high."#
    )
}

pub fn context_summary(evidence: &[String]) -> String {
    if evidence.is_empty() {
        return "No context retrieved".to_string();
    }

    let mut parts = vec![format!("Retrieved {} chunk(s):", evidence.len())];
    for (i, chunk) in evidence.iter().take(SUMMARY_CHUNKS).enumerate() {
        let content = if chunk.chars().count() > SUMMARY_CHUNK_CHARS {
            let head: String = chunk.chars().take(SUMMARY_CHUNK_CHARS).collect();
            format!("{}...", head)
        } else {
            chunk.clone()
        };
        parts.push(format!("Chunk {}: {}", i + 1, content));
    }
    if evidence.len() > SUMMARY_CHUNKS {
        parts.push(format!("... and {} more chunk(s)", evidence.len() - SUMMARY_CHUNKS));
    }
    parts.join("\n")
}

fn parse_score(raw: &str) -> Option<ParsedScore> {
    PARSERS.iter().find_map(|(name, parser)| {
        let parsed = parser(raw);
        if parsed.is_some() {
            tracing::debug!(strategy = *name, "Confidence parsed");
        }
        parsed
    })
}

/// Finite values are clamped into [0, 1]; anything else is rejected.
fn clamp_score(value: f64) -> Option<f64> {
    value.is_finite().then(|| value.clamp(0.0, 1.0))
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text_field(map: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

fn parse_structured(raw: &str) -> Option<ParsedScore> {
    let map = parse_json_object(raw)?;
    let confidence = ["confidence", "confidence_score", "score"]
        .iter()
        .find_map(|k| map.get(*k).filter(|v| !v.is_null()))
        .and_then(numeric)
        .and_then(clamp_score)?;
    Some(ParsedScore {
        confidence,
        reasoning: text_field(&map, &["reasoning", "reason"]),
    })
}

fn parse_textual(raw: &str) -> Option<ParsedScore> {
    let confidence = SCORE_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(raw)
            .and_then(|caps| caps[1].parse::<f64>().ok())
            .and_then(clamp_score)
    })?;
    let reasoning = REASONING_RE
        .captures(raw)
        .map(|caps| caps[1].to_string())
        .unwrap_or_default();
    Some(ParsedScore { confidence, reasoning })
}
