//! Pipeline orchestrator: the composition root and its escalation gates.
//!
//! A turn moves strictly forward through
//! classify → route → retrieve → generate → score, and ends either resolved or
//! escalated. Every exit point schedules exactly one interaction log, and
//! nothing inside a turn (error or panic) escapes [`Pipeline::run_turn`].

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::confidence::{ConfidenceAssessment, ConfidenceScorer};
use super::escalation::{EscalationDetails, EscalationHandler};
use super::generator::{GeneratedResponse, GenerationRequest, ResponseGenerator};
use super::intent::IntentClassifier;
use super::router::Router;
use crate::config::PipelineConfig;
use crate::interaction_log::{InteractionLogger, LoggerSettings, TurnTimer};
use crate::judge::Judge;
use crate::retrieval::{EvidenceRetriever, RetrievalResult};
use crate::store::DurableStore;
use crate::taxonomy::is_conversational;
use crate::types::{
    AssistantMode, Citation, ConversationTurn, Interaction, IntentResult, Outcome, TriggerType,
};
use crate::validation::sanitize_query_with_limit;

/// Fixed confidence for canned conversational replies.
pub const CONVERSATIONAL_CONFIDENCE: f64 = 0.95;

const ERROR_RESPONSE: &str =
    "I encountered an error processing your request. Please try again or contact support.";

/// Intents that may continue without evidence.
const EVIDENCE_OPTIONAL_INTENTS: [&str; 2] = ["unknown", "general_conversation"];

// ============================================================================
// Request / response
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub query: String,
    pub mode: AssistantMode,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl TurnRequest {
    pub fn new(query: impl Into<String>, mode: AssistantMode) -> Self {
        Self {
            query: query.into(),
            mode,
            history: Vec::new(),
            session_id: None,
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// What the UI layer renders for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResponse {
    /// The answer, or the escalation message when `escalated`.
    pub response_text: String,
    pub citations: Vec<Citation>,
    pub confidence_score: Option<f64>,
    pub escalated: bool,
    pub escalation_message: Option<String>,
    pub trigger_type: Option<TriggerType>,
    pub has_synthetic_content: bool,
    pub intent_name: Option<String>,
    /// Triggers the query exhibits beyond the gate that decided the turn.
    /// Informational only.
    #[serde(default)]
    pub advisory_triggers: Vec<TriggerType>,
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    classifier: IntentClassifier,
    router: Router,
    retriever: Arc<dyn EvidenceRetriever>,
    generator: ResponseGenerator,
    scorer: ConfidenceScorer,
    escalations: EscalationHandler,
    logger: InteractionLogger,
}

/// Everything an escalation exit needs besides the trigger.
struct Exit<'a> {
    trigger: TriggerType,
    reason: String,
    intent_name: Option<&'a str>,
    confidence_score: Option<f64>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        judge: Arc<dyn Judge>,
        retriever: Arc<dyn EvidenceRetriever>,
        store: Arc<dyn DurableStore>,
    ) -> Self {
        let logger = InteractionLogger::new(store, LoggerSettings::from(&config));
        Self::with_logger(config, judge, retriever, logger)
    }

    /// Build around an existing logger, e.g. one shared by several pipelines.
    pub fn with_logger(
        config: PipelineConfig,
        judge: Arc<dyn Judge>,
        retriever: Arc<dyn EvidenceRetriever>,
        logger: InteractionLogger,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(Arc::clone(&judge), &config),
            router: Router::new(),
            retriever,
            generator: ResponseGenerator::new(Arc::clone(&judge), &config),
            scorer: ConfidenceScorer::new(judge, &config),
            escalations: EscalationHandler::new(config.confidence_threshold),
            logger,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn logger(&self) -> &InteractionLogger {
        &self.logger
    }

    /// Single entry point for the UI layer.
    pub async fn run(
        &self,
        query: &str,
        mode: AssistantMode,
        history: Option<&[ConversationTurn]>,
    ) -> PipelineResponse {
        let request = TurnRequest::new(query, mode).with_history(history.map(<[_]>::to_vec).unwrap_or_default());
        self.run_turn(&request).await
    }

    pub async fn run_turn(&self, request: &TurnRequest) -> PipelineResponse {
        let timer = self.logger.start_timer();
        // Every stage and the stored record see the capped, trimmed query
        let request = &TurnRequest {
            query: sanitize_query_with_limit(&request.query, self.config.max_query_chars),
            ..request.clone()
        };
        tracing::info!(
            mode = %request.mode,
            query_len = request.query.chars().count(),
            history_turns = request.history.len(),
            "pipeline_started"
        );

        match AssertUnwindSafe(self.execute(request, &timer)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => self.fail(request, &timer, &panic_message(panic.as_ref())),
        }
    }

    async fn execute(&self, request: &TurnRequest, timer: &TurnTimer) -> PipelineResponse {
        let mode = request.mode;
        let history = request.history.as_slice();
        let mut record = blank_record(request);

        // Step 1: intent
        let Some(intent) = self.classifier.classify(&request.query, mode, Some(history)).await else {
            tracing::error!("intent_classification_failed");
            return self.exit(
                request,
                timer,
                record,
                Exit {
                    trigger: TriggerType::InsufficientEvidence,
                    reason: "Intent classification failed".to_string(),
                    intent_name: None,
                    confidence_score: None,
                },
            );
        };
        attach_intent(&mut record, &intent);
        let intent_name = intent.intent_name.as_str();

        // Step 2: routing
        let decision = self.router.route(intent.intent_category.as_str(), Some(intent_name), Some(mode));
        record.step_2_routing_decision = Some(decision.route);
        if decision.is_escalation() {
            return self.exit(
                request,
                timer,
                record,
                Exit {
                    trigger: TriggerType::HumanOnly,
                    reason: format!("Intent category: {}", intent.intent_category),
                    intent_name: Some(intent_name),
                    confidence_score: None,
                },
            );
        }

        // Step 3: retrieval, skipped for conversational intents
        let bypass = is_conversational(intent_name);
        let retrieval = if bypass {
            tracing::debug!(intent = %intent_name, "Retrieval bypassed");
            RetrievalResult::empty_success()
        } else {
            record.step_3_retrieval_performed = true;
            self.retrieve(&request.query, mode).await
        };
        record.retrieved_chunks_count = retrieval.evidence_chunks.len();

        if !bypass && !retrieval.has_evidence() && !EVIDENCE_OPTIONAL_INTENTS.contains(&intent_name) {
            return self.exit(
                request,
                timer,
                record,
                Exit {
                    trigger: TriggerType::InsufficientEvidence,
                    reason: "No retrieval results".to_string(),
                    intent_name: Some(intent_name),
                    confidence_score: None,
                },
            );
        }

        // Step 4: generation
        let generated = self
            .generator
            .generate(GenerationRequest {
                query: &request.query,
                evidence: &retrieval.evidence_chunks,
                mode,
                intent_name: Some(intent_name),
                citations: &retrieval.citations,
                history,
            })
            .await;
        let Some(generated) = generated else {
            return self.exit(
                request,
                timer,
                record,
                Exit {
                    trigger: TriggerType::InsufficientEvidence,
                    reason: "Response generation failed".to_string(),
                    intent_name: Some(intent_name),
                    confidence_score: None,
                },
            );
        };
        attach_generation(&mut record, &generated);

        // Step 5: confidence
        let (assessment, advisory_triggers) = if bypass {
            (conversational_assessment(self.scorer.threshold()), Vec::new())
        } else {
            let assessment = self
                .scorer
                .score(&generated.response_text, &retrieval.evidence_chunks, &request.query, Some(mode))
                .await;
            let advisory = self.escalations.detect_triggers(
                &request.query,
                Some(intent.intent_category),
                Some(assessment.confidence_score),
                Some(retrieval.evidence_chunks.as_slice()),
                Some(history),
            );
            if !advisory.is_empty() {
                tracing::info!(
                    triggers = ?advisory.iter().map(TriggerType::as_str).collect::<Vec<_>>(),
                    intent = %intent_name,
                    "advisory_triggers"
                );
            }
            (assessment, advisory)
        };
        record.step_5_confidence_score = Some(assessment.confidence_score);
        record.confidence_score = Some(assessment.confidence_score);

        if !assessment.meets_threshold {
            let mut response = self.exit(
                request,
                timer,
                record,
                Exit {
                    trigger: TriggerType::LowConfidence,
                    reason: format!(
                        "Confidence {:.2} below threshold {}",
                        assessment.confidence_score, assessment.threshold_value
                    ),
                    intent_name: Some(intent_name),
                    confidence_score: Some(assessment.confidence_score),
                },
            );
            response.advisory_triggers = advisory_triggers;
            return response;
        }

        // Step 6: resolved
        record.outcome = Outcome::Resolved;
        self.logger.log_interaction(record, None, Some(timer));
        tracing::info!(
            intent = %intent_name,
            confidence = assessment.confidence_score,
            citations = generated.citations.len(),
            processing_time_ms = timer.elapsed_ms(),
            "pipeline_resolved"
        );

        PipelineResponse {
            response_text: generated.response_text,
            citations: generated.citations,
            confidence_score: Some(assessment.confidence_score),
            escalated: false,
            escalation_message: None,
            trigger_type: None,
            has_synthetic_content: generated.has_synthetic_content,
            intent_name: Some(intent.intent_name.clone()),
            advisory_triggers,
        }
    }

    /// Retrieval failures of any kind leave the turn with no evidence.
    async fn retrieve(&self, query: &str, mode: AssistantMode) -> RetrievalResult {
        match tokio::time::timeout(self.config.call_timeout, self.retriever.retrieve(query, mode)).await {
            Ok(Ok(result)) if result.success => {
                tracing::info!(
                    chunks = result.evidence_chunks.len(),
                    citations = result.citations.len(),
                    "retrieval_completed"
                );
                result
            }
            Ok(Ok(result)) => {
                tracing::warn!(error = ?result.error, "Retriever reported failure");
                RetrievalResult::empty_success()
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Retrieval failed");
                RetrievalResult::empty_success()
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.config.call_timeout, "Retrieval timed out");
                RetrievalResult::empty_success()
            }
        }
    }

    /// Escalate, log the escalated interaction, and build the user-facing reply.
    fn exit(
        &self,
        request: &TurnRequest,
        timer: &TurnTimer,
        mut record: Interaction,
        exit: Exit<'_>,
    ) -> PipelineResponse {
        let outcome = self.escalations.escalate(
            exit.trigger,
            request.mode,
            &EscalationDetails {
                intent_name: exit.intent_name,
                reason: Some(&exit.reason),
                query: Some(&request.query),
                confidence_score: exit.confidence_score,
                evidence: None,
            },
        );

        record.outcome = Outcome::Escalated;
        record.step_6_escalation_triggered = true;
        record.escalation_reason = Some(outcome.escalation_reason.clone());
        self.logger.log_interaction(record, Some(outcome.trigger_type), Some(timer));

        PipelineResponse {
            response_text: outcome.escalation_message.clone(),
            citations: Vec::new(),
            confidence_score: exit.confidence_score,
            escalated: true,
            escalation_message: Some(outcome.escalation_message),
            trigger_type: Some(outcome.trigger_type),
            has_synthetic_content: false,
            intent_name: exit.intent_name.map(str::to_string),
            advisory_triggers: Vec::new(),
        }
    }

    fn fail(&self, request: &TurnRequest, timer: &TurnTimer, error: &str) -> PipelineResponse {
        tracing::error!(error = %error, mode = %request.mode, "pipeline_error");
        let message = format!("Pipeline error: {}", error);

        let mut record = blank_record(request);
        record.outcome = Outcome::Escalated;
        record.step_6_escalation_triggered = true;
        record.escalation_reason = Some(message.clone());
        self.logger.log_interaction(record, None, Some(timer));

        PipelineResponse {
            response_text: ERROR_RESPONSE.to_string(),
            citations: Vec::new(),
            confidence_score: None,
            escalated: true,
            escalation_message: Some(message),
            trigger_type: None,
            has_synthetic_content: false,
            intent_name: None,
            advisory_triggers: Vec::new(),
        }
    }
}

// ============================================================================
// Record assembly
// ============================================================================

fn blank_record(request: &TurnRequest) -> Interaction {
    Interaction {
        id: None,
        timestamp: chrono::Utc::now(),
        assistant_mode: request.mode,
        session_id: request.session_id.clone(),
        user_query: request.query.clone(),
        intent_name: None,
        intent_category: None,
        classification_reason: None,
        step_1_intent_completed: false,
        step_2_routing_decision: None,
        step_3_retrieval_performed: false,
        step_4_response_generated: false,
        step_5_confidence_score: None,
        step_6_escalation_triggered: false,
        outcome: Outcome::Escalated,
        confidence_score: None,
        escalation_reason: None,
        response_text: None,
        citations: None,
        retrieved_chunks_count: 0,
        processing_time_ms: None,
        response_generation_time_ms: None,
    }
}

fn attach_intent(record: &mut Interaction, intent: &IntentResult) {
    record.step_1_intent_completed = true;
    record.intent_name = Some(intent.intent_name.clone());
    record.intent_category = Some(intent.intent_category);
    record.classification_reason = Some(intent.classification_reason.clone());
}

fn attach_generation(record: &mut Interaction, generated: &GeneratedResponse) {
    record.step_4_response_generated = true;
    record.response_text = Some(generated.response_text.clone());
    record.citations = Some(generated.citations.clone());
    record.response_generation_time_ms = Some(generated.response_generation_time_ms);
}

fn conversational_assessment(threshold: f64) -> ConfidenceAssessment {
    ConfidenceAssessment {
        confidence_score: CONVERSATIONAL_CONFIDENCE,
        meets_threshold: true,
        threshold_value: threshold,
        reasoning: "Conversational intent - deterministic response".to_string(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unexpected panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::JudgeError;
    use crate::store::{MemoryStore, Table};
    use crate::testing::{eventually, ScriptedJudge, StaticRetriever};
    use async_trait::async_trait;
    use std::time::Duration;

    fn intent_json(name: &str, category: &str) -> String {
        format!(
            r#"{{"intent_name": "{}", "intent_category": "{}", "classification_reason": "test"}}"#,
            name, category
        )
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            judge_backoff_base: Duration::from_millis(1),
            log_retry_base_delay: Duration::from_millis(1),
            ..PipelineConfig::default()
        }
    }

    fn pipeline(
        judge: Arc<ScriptedJudge>,
        retriever: Arc<dyn EvidenceRetriever>,
        store: Arc<MemoryStore>,
    ) -> Pipeline {
        Pipeline::new(fast_config(), judge, retriever, store)
    }

    async fn logged_interaction(store: &MemoryStore) -> serde_json::Value {
        assert!(eventually(|| store.count(Table::Interactions) == 1).await);
        store.rows(Table::Interactions).remove(0)
    }

    #[tokio::test]
    async fn test_greeting_bypasses_retrieval_and_scoring() {
        let judge = Arc::new(ScriptedJudge::new().reply(&intent_json("greeting", "automatable")));
        let retriever = Arc::new(StaticRetriever::new(vec!["unused".into()], Vec::new()));
        let store = Arc::new(MemoryStore::new());
        let response = pipeline(judge.clone(), retriever.clone(), store.clone())
            .run("Hello", AssistantMode::Customer, None)
            .await;

        assert!(!response.escalated);
        assert_eq!(response.confidence_score, Some(CONVERSATIONAL_CONFIDENCE));
        assert_eq!(response.response_text, super::super::generator::greeting_text(AssistantMode::Customer));
        assert_eq!(retriever.calls(), 0);
        assert_eq!(judge.requests().len(), 1);

        let row = logged_interaction(&store).await;
        assert_eq!(row["outcome"], "resolved");
        assert_eq!(row["step_3_retrieval_performed"], false);
        assert_eq!(row["step_5_confidence_score"], 0.95);
    }

    #[tokio::test]
    async fn test_classification_failure_escalates_insufficient_evidence() {
        let judge = Arc::new(ScriptedJudge::new().fail(JudgeError::Transport("down".into())));
        let store = Arc::new(MemoryStore::new());
        let response = pipeline(judge, Arc::new(StaticRetriever::empty()), store.clone())
            .run("What are the fees?", AssistantMode::Banker, None)
            .await;

        assert!(response.escalated);
        assert_eq!(response.trigger_type, Some(TriggerType::InsufficientEvidence));
        assert_eq!(Some(response.response_text.clone()), response.escalation_message);

        let row = logged_interaction(&store).await;
        assert_eq!(row["step_1_intent_completed"], false);
        assert_eq!(row["escalation_reason"], "Intent classification failed");
    }

    #[tokio::test]
    async fn test_human_only_routes_to_escalation() {
        let judge = Arc::new(ScriptedJudge::new().reply(&intent_json("complaint", "human_only")));
        let retriever = Arc::new(StaticRetriever::new(vec!["chunk".into()], Vec::new()));
        let store = Arc::new(MemoryStore::new());
        let response = pipeline(judge, retriever.clone(), store.clone())
            .run("I want to complain", AssistantMode::Customer, None)
            .await;

        assert!(response.escalated);
        assert_eq!(response.trigger_type, Some(TriggerType::HumanOnly));
        assert!(response.response_text.contains("complaint"));
        assert_eq!(retriever.calls(), 0);

        let row = logged_interaction(&store).await;
        assert_eq!(row["step_2_routing_decision"], "escalate");
        assert_eq!(row["intent_category"], "human_only");
        assert!(row["escalation_reason"].as_str().unwrap().contains("human_only"));
    }

    #[tokio::test]
    async fn test_empty_retrieval_escalates_for_grounded_intents() {
        let judge = Arc::new(ScriptedJudge::new().reply(&intent_json("fee_inquiry", "automatable")));
        let store = Arc::new(MemoryStore::new());
        let response = pipeline(judge, Arc::new(StaticRetriever::failing("index offline")), store.clone())
            .run("What are the fees?", AssistantMode::Customer, None)
            .await;

        assert!(response.escalated);
        assert_eq!(response.trigger_type, Some(TriggerType::InsufficientEvidence));

        let row = logged_interaction(&store).await;
        assert_eq!(row["step_3_retrieval_performed"], true);
        assert_eq!(row["retrieved_chunks_count"], 0);
        assert_eq!(row["escalation_reason"], "No retrieval results");
    }

    #[tokio::test]
    async fn test_low_confidence_escalates_with_score() {
        let judge = Arc::new(
            ScriptedJudge::new()
                .reply(&intent_json("fee_structure", "automatable"))
                .reply("The monthly fee is $5 [1].")
                .reply(r#"{"confidence": 0.5, "reasoning": "partial"}"#),
        );
        let retriever = Arc::new(StaticRetriever::new(
            vec!["Monthly account fee is $5.".into()],
            vec![Citation::placeholder(1)],
        ));
        let store = Arc::new(MemoryStore::new());
        let response = pipeline(judge, retriever, store.clone())
            .run("What is the monthly fee?", AssistantMode::Banker, None)
            .await;

        assert!(response.escalated);
        assert_eq!(response.trigger_type, Some(TriggerType::LowConfidence));
        assert_eq!(response.confidence_score, Some(0.5));
        assert!(response.response_text.contains("0.50"));

        let row = logged_interaction(&store).await;
        assert_eq!(row["step_4_response_generated"], true);
        assert_eq!(row["confidence_score"], 0.5);
        assert_eq!(row["response_text"], "The monthly fee is $5 [1].");
    }

    #[tokio::test]
    async fn test_resolved_turn_carries_citations_and_advisories() {
        let judge = Arc::new(
            ScriptedJudge::new()
                .reply(&intent_json("card_dispute_process", "automatable"))
                .reply("Disputes take up to 45 days [1][2].")
                .reply(r#"{"confidence": 0.9, "reasoning": "well supported"}"#),
        );
        let retriever = Arc::new(StaticRetriever::new(
            vec!["Dispute timeline.".into(), "Dispute form.".into()],
            vec![Citation::placeholder(1), Citation::placeholder(2)],
        ));
        let store = Arc::new(MemoryStore::new());
        let response = pipeline(judge, retriever, store.clone())
            .run("How long does a chargeback on my card take?", AssistantMode::Customer, None)
            .await;

        assert!(!response.escalated);
        assert_eq!(response.citations.len(), 2);
        assert_eq!(response.confidence_score, Some(0.9));
        assert_eq!(response.advisory_triggers, vec![TriggerType::AccountSpecific]);

        let row = logged_interaction(&store).await;
        assert_eq!(row["outcome"], "resolved");
        assert_eq!(row["step_6_escalation_triggered"], false);
        assert!(row["processing_time_ms"].is_u64());
        assert_eq!(store.count(Table::Escalations), 0);
    }

    #[tokio::test]
    async fn test_unknown_intent_continues_without_evidence() {
        let judge = Arc::new(ScriptedJudge::new().reply(&intent_json("unknown", "automatable")));
        let store = Arc::new(MemoryStore::new());
        let response = pipeline(judge, Arc::new(StaticRetriever::empty()), store)
            .run("asdf", AssistantMode::Banker, None)
            .await;

        assert!(!response.escalated);
        assert_eq!(response.response_text, super::super::generator::guidance_text(AssistantMode::Banker));
    }

    #[tokio::test]
    async fn test_generation_failure_escalates_insufficient_evidence() {
        let judge = Arc::new(
            ScriptedJudge::new()
                .reply(&intent_json("fee_inquiry", "automatable"))
                .fail(JudgeError::Transport("reset".into()))
                .fail(JudgeError::Transport("reset".into()))
                .fail(JudgeError::Transport("reset".into())),
        );
        let retriever = Arc::new(StaticRetriever::new(
            vec!["Monthly account fee is $5.".into()],
            vec![Citation::placeholder(1)],
        ));
        let store = Arc::new(MemoryStore::new());
        let response = pipeline(judge.clone(), retriever, store.clone())
            .run("What is the monthly fee?", AssistantMode::Customer, None)
            .await;

        assert!(response.escalated);
        assert_eq!(response.trigger_type, Some(TriggerType::InsufficientEvidence));
        assert_eq!(response.confidence_score, None);
        assert_eq!(judge.requests().len(), 4);

        let row = logged_interaction(&store).await;
        assert_eq!(row["step_3_retrieval_performed"], true);
        assert_eq!(row["step_4_response_generated"], false);
        assert_eq!(row["escalation_reason"], "Response generation failed");
        assert!(eventually(|| store.count(Table::Escalations) == 1).await);
        assert_eq!(store.rows(Table::Escalations)[0]["trigger_type"], "insufficient_evidence");
    }

    #[tokio::test]
    async fn test_oversized_query_is_capped_for_every_stage() {
        let judge = Arc::new(
            ScriptedJudge::new()
                .reply(&intent_json("fee_inquiry", "automatable"))
                .reply("The monthly fee is $5 [1].")
                .reply(r#"{"confidence": 0.9, "reasoning": "stated"}"#),
        );
        let retriever = Arc::new(StaticRetriever::new(
            vec!["Monthly account fee is $5.".into()],
            vec![Citation::placeholder(1)],
        ));
        let store = Arc::new(MemoryStore::new());
        let query = format!("   {}   ", "a".repeat(5000));
        let response = pipeline(judge.clone(), retriever, store.clone())
            .run(&query, AssistantMode::Customer, None)
            .await;
        assert!(!response.escalated);

        let capped = "a".repeat(2000);
        let too_long = "a".repeat(2001);
        let requests = judge.requests();
        assert_eq!(requests.len(), 3);
        for request in &requests {
            let prompt = request
                .messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            assert!(prompt.contains(&capped));
            assert!(!prompt.contains(&too_long));
        }

        let row = logged_interaction(&store).await;
        assert_eq!(row["user_query"].as_str().unwrap(), capped);
    }

    struct PanickingRetriever;

    #[async_trait]
    impl EvidenceRetriever for PanickingRetriever {
        async fn retrieve(&self, _query: &str, _mode: AssistantMode) -> anyhow::Result<RetrievalResult> {
            panic!("index corrupted");
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_generic_escalation() {
        let judge = Arc::new(ScriptedJudge::new().reply(&intent_json("fee_inquiry", "automatable")));
        let store = Arc::new(MemoryStore::new());
        let response = pipeline(judge, Arc::new(PanickingRetriever), store.clone())
            .run("fees?", AssistantMode::Customer, None)
            .await;

        assert!(response.escalated);
        assert_eq!(response.response_text, ERROR_RESPONSE);
        assert_eq!(response.escalation_message.as_deref(), Some("Pipeline error: index corrupted"));

        let row = logged_interaction(&store).await;
        assert_eq!(row["outcome"], "escalated");
        assert_eq!(row["escalation_reason"], "Pipeline error: index corrupted");
    }
}
