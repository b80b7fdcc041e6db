//! Deterministic fakes for the judge and retriever collaborators.
//!
//! Replies are queued and consumed in order. An exhausted script is an error,
//! so a test that makes more calls than it planned for fails loudly.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::judge::{Judge, JudgeError, JudgeRequest, JudgeResult, TokenUsage};
use crate::retrieval::{EvidenceRetriever, RetrievalResult};
use crate::types::{AssistantMode, Citation, Interaction, Outcome, Route};

enum Step {
    Reply { content: String, delay: Option<Duration> },
    Fail(JudgeError),
}

/// Judge that plays back a fixed script and records every request.
#[derive(Default)]
pub struct ScriptedJudge {
    script: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<JudgeRequest>>,
}

impl ScriptedJudge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, content: &str) -> Self {
        self.push(Step::Reply { content: content.to_string(), delay: None })
    }

    /// Reply only after `delay`, to exercise call timeouts.
    pub fn reply_after(self, delay: Duration, content: &str) -> Self {
        self.push(Step::Reply { content: content.to_string(), delay: Some(delay) })
    }

    pub fn fail(self, error: JudgeError) -> Self {
        self.push(Step::Fail(error))
    }

    pub fn requests(&self) -> Vec<JudgeRequest> {
        self.requests.lock().clone()
    }

    fn push(self, step: Step) -> Self {
        self.script.lock().push_back(step);
        self
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn complete(&self, request: &JudgeRequest) -> Result<JudgeResult, JudgeError> {
        self.requests.lock().push(request.clone());
        let step = self.script.lock().pop_front();

        match step {
            Some(Step::Reply { content, delay }) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(JudgeResult {
                    content,
                    usage: TokenUsage::default(),
                    model: Some("scripted".to_string()),
                })
            }
            Some(Step::Fail(error)) => Err(error),
            None => Err(JudgeError::Transport("judge script exhausted".to_string())),
        }
    }
}

/// Retriever that always returns the same result.
pub struct StaticRetriever {
    result: Result<RetrievalResult, String>,
    calls: AtomicUsize,
}

impl StaticRetriever {
    pub fn new(evidence_chunks: Vec<String>, citations: Vec<Citation>) -> Self {
        Self {
            result: Ok(RetrievalResult {
                evidence_chunks,
                citations,
                success: true,
                error: None,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    /// Successful search with no hits.
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Every call errors with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EvidenceRetriever for StaticRetriever {
    async fn retrieve(&self, _query: &str, _mode: AssistantMode) -> anyhow::Result<RetrievalResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.result {
            Ok(result) => Ok(result.clone()),
            Err(message) => Err(anyhow::anyhow!("{}", message)),
        }
    }
}

/// Poll `condition` until it holds, giving up after about two seconds.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// A resolved customer-mode interaction with every step completed.
pub fn sample_interaction() -> Interaction {
    Interaction {
        id: None,
        timestamp: chrono::Utc::now(),
        assistant_mode: AssistantMode::Customer,
        session_id: Some("session-1".to_string()),
        user_query: "What are the fees for international transfers?".to_string(),
        intent_name: Some("fee_inquiry".to_string()),
        intent_category: Some(crate::types::IntentCategory::Automatable),
        classification_reason: Some("Asks about fees".to_string()),
        step_1_intent_completed: true,
        step_2_routing_decision: Some(Route::Continue),
        step_3_retrieval_performed: true,
        step_4_response_generated: true,
        step_5_confidence_score: Some(0.82),
        step_6_escalation_triggered: false,
        outcome: Outcome::Resolved,
        confidence_score: Some(0.82),
        escalation_reason: None,
        response_text: Some("International transfers cost $10 [1].".to_string()),
        citations: Some(vec![Citation::placeholder(1)]),
        retrieved_chunks_count: 1,
        processing_time_ms: None,
        response_generation_time_ms: Some(120),
    }
}
