//! Interaction Logger
//!
//! Persists every pipeline run, plus the escalation record of escalated runs,
//! without ever making the caller wait on the store:
//! - `log_interaction` hands the record to a spawned task and returns at once
//! - failed inserts go onto an unbounded retry queue drained by one worker
//! - the worker backs off `base * 2^attempt` and drops an item once its
//!   attempt count reaches the cap, leaving only a log trail

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::backoff;
use crate::config::PipelineConfig;
use crate::store::{DurableStore, StoreError, Table};
use crate::types::{Escalation, Interaction, Outcome, TriggerType};
use crate::validation::validate_confidence;

// ============================================================================
// API-call observability
// ============================================================================

/// One judge round-trip, reported as a structured log event only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiCallRecord {
    pub api_name: String,
    pub model: Option<String>,
    pub request_tokens: Option<u32>,
    pub response_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    pub processing_time_ms: Option<u64>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl ApiCallRecord {
    pub fn new(api_name: &str) -> Self {
        Self {
            api_name: api_name.to_string(),
            ..Default::default()
        }
    }
}

pub fn log_api_call(record: &ApiCallRecord) {
    match &record.error {
        Some(error) => tracing::warn!(
            api = %record.api_name,
            status_code = ?record.status_code,
            latency_ms = ?record.processing_time_ms,
            error = %error,
            "api_call_failed"
        ),
        None => tracing::info!(
            api = %record.api_name,
            model = ?record.model,
            request_tokens = ?record.request_tokens,
            response_tokens = ?record.response_tokens,
            total_tokens = ?record.total_tokens,
            latency_ms = ?record.processing_time_ms,
            "api_call_completed"
        ),
    }
}

// ============================================================================
// Escalation trigger derivation
// ============================================================================

/// Reason-text keywords, in tie-break order.
const KEYWORD_TRIGGERS: &[(&str, TriggerType)] = &[
    ("human_only", TriggerType::HumanOnly),
    ("confidence", TriggerType::LowConfidence),
    ("insufficient", TriggerType::InsufficientEvidence),
    ("conflicting", TriggerType::ConflictingEvidence),
    ("account", TriggerType::AccountSpecific),
    ("security", TriggerType::SecurityFraud),
    ("fraud", TriggerType::SecurityFraud),
    ("financial advice", TriggerType::FinancialAdvice),
    ("advice", TriggerType::FinancialAdvice),
    ("legal", TriggerType::LegalHardship),
    ("hardship", TriggerType::LegalHardship),
    ("emotional", TriggerType::EmotionalDistress),
    ("distress", TriggerType::EmotionalDistress),
    ("urgent", TriggerType::EmotionalDistress),
    ("repeated", TriggerType::RepeatedMisunderstanding),
    ("misunderstanding", TriggerType::RepeatedMisunderstanding),
    ("human", TriggerType::ExplicitHumanRequest),
    ("agent", TriggerType::ExplicitHumanRequest),
];

/// Best-effort trigger for a free-text escalation reason.
///
/// The longest matching keyword wins; equal lengths keep table order.
/// `None` means no keyword matched.
pub fn trigger_from_reason(reason: &str) -> Option<TriggerType> {
    let lowered = reason.to_lowercase();
    KEYWORD_TRIGGERS
        .iter()
        .filter(|(keyword, _)| lowered.contains(keyword))
        .fold(None, |best: Option<(&str, TriggerType)>, &(keyword, trigger)| match best {
            Some((current, _)) if current.len() >= keyword.len() => best,
            _ => Some((keyword, trigger)),
        })
        .map(|(_, trigger)| trigger)
}

// ============================================================================
// Logger
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct LoggerSettings {
    pub log_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl From<&PipelineConfig> for LoggerSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            log_timeout: config.log_timeout,
            max_retries: config.log_max_retries,
            retry_base_delay: config.log_retry_base_delay,
        }
    }
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

/// Wall-clock origin of one turn. Each turn owns its own timer.
#[derive(Debug, Clone, Copy)]
pub struct TurnTimer {
    started: Instant,
}

impl TurnTimer {
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Returned immediately by the log calls. Never the store-assigned id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogReceipt {
    pub correlation_id: Uuid,
}

#[derive(Debug, Default)]
struct LoggerStats {
    scheduled: AtomicU64,
    persisted: AtomicU64,
    queued_for_retry: AtomicU64,
    retried_ok: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoggerStatsSnapshot {
    pub scheduled: u64,
    pub persisted: u64,
    pub queued_for_retry: u64,
    pub retried_ok: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone)]
enum LogPayload {
    Interaction {
        record: Interaction,
        trigger: Option<TriggerType>,
    },
    Escalation(Escalation),
}

impl LogPayload {
    fn kind(&self) -> &'static str {
        match self {
            LogPayload::Interaction { .. } => "interaction",
            LogPayload::Escalation(_) => "escalation",
        }
    }
}

#[derive(Debug)]
struct RetryItem {
    payload: LogPayload,
    attempt: u32,
}

struct LoggerShared {
    store: Arc<dyn DurableStore>,
    settings: LoggerSettings,
    stats: LoggerStats,
    retry_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<RetryItem>>>,
    shut_down: AtomicBool,
}

/// Cheap to clone; clones share the store, stats and retry worker.
#[derive(Clone)]
pub struct InteractionLogger {
    shared: Arc<LoggerShared>,
}

impl InteractionLogger {
    pub fn new(store: Arc<dyn DurableStore>, settings: LoggerSettings) -> Self {
        Self {
            shared: Arc::new(LoggerShared {
                store,
                settings,
                stats: LoggerStats::default(),
                retry_tx: parking_lot::Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn start_timer(&self) -> TurnTimer {
        TurnTimer {
            started: Instant::now(),
        }
    }

    /// Schedule persistence of one interaction and return without waiting.
    ///
    /// An escalated interaction also produces its escalation record once the
    /// interaction insert succeeds. `trigger` overrides the keyword
    /// derivation from the reason text.
    pub fn log_interaction(
        &self,
        mut record: Interaction,
        trigger: Option<TriggerType>,
        timer: Option<&TurnTimer>,
    ) -> LogReceipt {
        if record.processing_time_ms.is_none() {
            record.processing_time_ms = timer.map(TurnTimer::elapsed_ms);
        }
        if record.confidence_score.is_some() && !validate_confidence(record.confidence_score) {
            tracing::warn!(score = ?record.confidence_score, "Invalid confidence score, storing null");
            record.confidence_score = None;
        }
        if record.step_5_confidence_score.is_some()
            && !validate_confidence(record.step_5_confidence_score)
        {
            record.step_5_confidence_score = None;
        }
        if record.outcome == Outcome::Escalated {
            record.step_6_escalation_triggered = true;
            if record.escalation_reason.is_none() {
                tracing::warn!("Escalated interaction logged without a reason");
                record.escalation_reason = Some("Escalated without a recorded reason".to_string());
            }
        }

        self.schedule(LogPayload::Interaction { record, trigger })
    }

    pub fn stats(&self) -> LoggerStatsSnapshot {
        let s = &self.shared.stats;
        LoggerStatsSnapshot {
            scheduled: s.scheduled.load(Ordering::Relaxed),
            persisted: s.persisted.load(Ordering::Relaxed),
            queued_for_retry: s.queued_for_retry.load(Ordering::Relaxed),
            retried_ok: s.retried_ok.load(Ordering::Relaxed),
            dropped: s.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting retries. Items already queued are still processed;
    /// anything that fails afterwards is dropped.
    pub fn shutdown(&self) {
        self.shared.shut_down.store(true, Ordering::SeqCst);
        if self.shared.retry_tx.lock().take().is_some() {
            tracing::info!("Interaction logger retry queue closed");
        }
    }

    fn schedule(&self, payload: LogPayload) -> LogReceipt {
        let receipt = LogReceipt {
            correlation_id: Uuid::new_v4(),
        };
        self.shared.stats.scheduled.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::clone(&self.shared);

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for item in shared.persist_now(payload).await {
                        shared.enqueue(item);
                    }
                });
            }
            Err(_) => {
                // No runtime on this thread: persist on a private one and run
                // the retries inline there.
                let spawned = std::thread::Builder::new()
                    .name("interaction-log".into())
                    .spawn(move || {
                        let runtime = match tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                        {
                            Ok(rt) => rt,
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to build logging runtime");
                                return;
                            }
                        };
                        runtime.block_on(async move {
                            let mut pending = shared.persist_now(payload).await;
                            while let Some(item) = pending.pop() {
                                pending.extend(shared.retry_once(item).await);
                            }
                        });
                    });
                if let Err(e) = spawned {
                    tracing::error!(error = %e, "Failed to spawn logging thread");
                }
            }
        }

        receipt
    }
}

impl LoggerShared {
    async fn insert(&self, table: Table, record: serde_json::Value) -> Result<String, StoreError> {
        match tokio::time::timeout(self.settings.log_timeout, self.store.insert(table, record)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        }
    }

    /// One insert. On success, returns the dependent record still to persist.
    async fn attempt(&self, payload: &LogPayload) -> Result<Option<LogPayload>, StoreError> {
        match payload {
            LogPayload::Interaction { record, trigger } => {
                let value = serde_json::to_value(record).map_err(|e| StoreError::Rejected {
                    table: Table::Interactions.as_str(),
                    reason: e.to_string(),
                })?;
                let id = self.insert(Table::Interactions, value).await?;
                tracing::info!(
                    interaction_id = %id,
                    mode = %record.assistant_mode,
                    outcome = ?record.outcome,
                    "interaction_logged"
                );
                Ok(dependent_escalation(record, *trigger, &id).map(LogPayload::Escalation))
            }
            LogPayload::Escalation(escalation) => {
                let value = serde_json::to_value(escalation).map_err(|e| StoreError::Rejected {
                    table: Table::Escalations.as_str(),
                    reason: e.to_string(),
                })?;
                let id = self.insert(Table::Escalations, value).await?;
                tracing::info!(
                    escalation_id = %id,
                    interaction_id = %escalation.interaction_id,
                    trigger = %escalation.trigger_type,
                    "escalation_logged"
                );
                Ok(None)
            }
        }
    }

    /// First attempt for `payload` and any record that depends on it.
    /// Returns the items that need retrying.
    async fn persist_now(&self, payload: LogPayload) -> Vec<RetryItem> {
        let mut failed = Vec::new();
        let mut next = Some(payload);
        while let Some(payload) = next.take() {
            match self.attempt(&payload).await {
                Ok(dependent) => {
                    self.stats.persisted.fetch_add(1, Ordering::Relaxed);
                    next = dependent;
                }
                Err(e) => {
                    tracing::warn!(kind = payload.kind(), error = %e, "Log insert failed, queued for retry");
                    self.stats.queued_for_retry.fetch_add(1, Ordering::Relaxed);
                    failed.push(RetryItem { payload, attempt: 0 });
                }
            }
        }
        failed
    }

    /// Back off, retry once, and return whatever still needs work.
    async fn retry_once(&self, item: RetryItem) -> Vec<RetryItem> {
        if item.attempt >= self.settings.max_retries {
            tracing::error!(
                kind = item.payload.kind(),
                attempts = item.attempt,
                "log_retry_exhausted"
            );
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        }

        tokio::time::sleep(backoff::exponential(self.settings.retry_base_delay, item.attempt)).await;

        match self.attempt(&item.payload).await {
            Ok(dependent) => {
                tracing::info!(kind = item.payload.kind(), attempt = item.attempt + 1, "Log retry succeeded");
                self.stats.retried_ok.fetch_add(1, Ordering::Relaxed);
                self.stats.persisted.fetch_add(1, Ordering::Relaxed);
                match dependent {
                    Some(payload) => self.persist_now(payload).await,
                    None => Vec::new(),
                }
            }
            Err(e) => {
                tracing::warn!(
                    kind = item.payload.kind(),
                    attempt = item.attempt + 1,
                    error = %e,
                    "Log retry failed"
                );
                vec![RetryItem {
                    payload: item.payload,
                    attempt: item.attempt + 1,
                }]
            }
        }
    }

    /// Push onto the retry queue, starting the worker on first use.
    fn enqueue(self: &Arc<Self>, item: RetryItem) {
        let mut guard = self.retry_tx.lock();
        if self.shut_down.load(Ordering::SeqCst) {
            tracing::warn!(kind = item.payload.kind(), "Logger shut down, dropping record");
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if guard.is_none() {
            let Ok(handle) = Handle::try_current() else {
                tracing::error!(kind = item.payload.kind(), "No runtime for retry worker, dropping record");
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            };
            let (tx, rx) = mpsc::unbounded_channel();
            handle.spawn(Self::run_worker(Arc::clone(self), rx));
            tracing::debug!("Interaction log retry worker started");
            *guard = Some(tx);
        }

        if let Some(tx) = guard.as_ref() {
            if let Err(mpsc::error::SendError(item)) = tx.send(item) {
                tracing::warn!(kind = item.payload.kind(), "Retry queue closed, dropping record");
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn run_worker(shared: Arc<Self>, mut rx: mpsc::UnboundedReceiver<RetryItem>) {
        while let Some(item) = rx.recv().await {
            for next in shared.retry_once(item).await {
                shared.enqueue(next);
            }
        }
        tracing::debug!("Interaction log retry worker stopped");
    }
}

fn dependent_escalation(
    record: &Interaction,
    trigger: Option<TriggerType>,
    interaction_id: &str,
) -> Option<Escalation> {
    if record.outcome != Outcome::Escalated {
        return None;
    }
    let reason = record.escalation_reason.as_ref()?;
    let trigger_type = trigger
        .or_else(|| trigger_from_reason(reason))
        .unwrap_or(TriggerType::HumanOnly);
    Some(Escalation {
        id: None,
        interaction_id: interaction_id.to_string(),
        trigger_type,
        escalation_reason: reason.clone(),
        created_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{eventually, sample_interaction};

    fn fast_settings() -> LoggerSettings {
        LoggerSettings {
            log_timeout: Duration::from_millis(200),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_trigger_from_reason_prefers_longest_keyword() {
        assert_eq!(
            trigger_from_reason("Intent category: human_only"),
            Some(TriggerType::HumanOnly)
        );
        assert_eq!(
            trigger_from_reason("Financial advice framing detected"),
            Some(TriggerType::FinancialAdvice)
        );
        assert_eq!(
            trigger_from_reason("Confidence 0.50 below threshold 0.68"),
            Some(TriggerType::LowConfidence)
        );
        assert_eq!(
            trigger_from_reason("Security or fraud indicators detected"),
            Some(TriggerType::SecurityFraud)
        );
        assert_eq!(trigger_from_reason("something odd"), None);
    }

    #[tokio::test]
    async fn test_escalated_interaction_writes_escalation_record() {
        let store = Arc::new(MemoryStore::new());
        let logger = InteractionLogger::new(store.clone(), fast_settings());

        let mut record = sample_interaction();
        record.outcome = Outcome::Escalated;
        record.escalation_reason = Some("Intent category: human_only".into());
        logger.log_interaction(record, None, None);

        assert!(eventually(|| store.count(Table::Escalations) == 1).await);
        let interaction = store.rows(Table::Interactions).remove(0);
        let escalation = store.rows(Table::Escalations).remove(0);
        assert_eq!(escalation["interaction_id"], interaction["id"]);
        assert_eq!(escalation["trigger_type"], "human_only");
        assert_eq!(interaction["step_6_escalation_triggered"], true);
    }

    #[tokio::test]
    async fn test_explicit_trigger_wins_over_reason_text() {
        let store = Arc::new(MemoryStore::new());
        let logger = InteractionLogger::new(store.clone(), fast_settings());

        let mut record = sample_interaction();
        record.outcome = Outcome::Escalated;
        record.escalation_reason = Some("Intent classification failed".into());
        logger.log_interaction(record, Some(TriggerType::InsufficientEvidence), None);

        assert!(eventually(|| store.count(Table::Escalations) == 1).await);
        assert_eq!(
            store.rows(Table::Escalations)[0]["trigger_type"],
            "insufficient_evidence"
        );
    }

    #[tokio::test]
    async fn test_invalid_confidence_is_nulled() {
        let store = Arc::new(MemoryStore::new());
        let logger = InteractionLogger::new(store.clone(), fast_settings());

        let mut record = sample_interaction();
        record.confidence_score = Some(1.7);
        logger.log_interaction(record, None, None);

        assert!(eventually(|| store.count(Table::Interactions) == 1).await);
        assert!(store.rows(Table::Interactions)[0]["confidence_score"].is_null());
    }

    #[tokio::test]
    async fn test_failed_insert_is_retried() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_inserts(2);
        let logger = InteractionLogger::new(store.clone(), fast_settings());

        logger.log_interaction(sample_interaction(), None, None);

        assert!(eventually(|| store.count(Table::Interactions) == 1).await);
        let stats = logger.stats();
        assert_eq!(stats.queued_for_retry, 1);
        assert_eq!(stats.retried_ok, 1);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test]
    async fn test_retried_escalation_still_writes_escalation_record() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_inserts(1);
        let logger = InteractionLogger::new(store.clone(), fast_settings());

        let mut record = sample_interaction();
        record.outcome = Outcome::Escalated;
        record.escalation_reason = Some("Confidence 0.40 below threshold 0.68".into());
        logger.log_interaction(record, None, None);

        assert!(eventually(|| store.count(Table::Escalations) == 1).await);
        let interaction = store.rows(Table::Interactions).remove(0);
        let escalation = store.rows(Table::Escalations).remove(0);
        assert_eq!(escalation["interaction_id"], interaction["id"]);
        assert_eq!(escalation["trigger_type"], "low_confidence");

        let stats = logger.stats();
        assert_eq!(stats.queued_for_retry, 1);
        assert_eq!(stats.retried_ok, 1);
        assert_eq!(stats.persisted, 2);
    }

    #[tokio::test]
    async fn test_insert_past_log_timeout_is_queued_for_retry() {
        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(300)));
        let settings = LoggerSettings {
            log_timeout: Duration::from_millis(30),
            ..fast_settings()
        };
        let logger = InteractionLogger::new(store.clone(), settings);

        logger.log_interaction(sample_interaction(), None, None);

        assert!(eventually(|| logger.stats().queued_for_retry == 1).await);
        assert!(eventually(|| logger.stats().dropped == 1).await);
        assert_eq!(logger.stats().retried_ok, 0);
        assert_eq!(store.count(Table::Interactions), 0);
    }

    #[tokio::test]
    async fn test_item_dropped_after_max_retries() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_inserts(100);
        let logger = InteractionLogger::new(store.clone(), fast_settings());

        logger.log_interaction(sample_interaction(), None, None);

        assert!(eventually(|| logger.stats().dropped == 1).await);
        assert_eq!(store.count(Table::Interactions), 0);
        assert_eq!(logger.stats().retried_ok, 0);
    }

    #[tokio::test]
    async fn test_slow_store_does_not_block_caller() {
        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(150)));
        let logger = InteractionLogger::new(store.clone(), fast_settings());

        let started = Instant::now();
        logger.log_interaction(sample_interaction(), None, None);
        assert!(started.elapsed() < Duration::from_millis(50));

        assert!(eventually(|| store.count(Table::Interactions) == 1).await);
    }

    #[test]
    fn test_logging_without_runtime_still_persists() {
        let store = Arc::new(MemoryStore::new());
        let logger = InteractionLogger::new(store.clone(), fast_settings());

        logger.log_interaction(sample_interaction(), None, None);

        let deadline = Instant::now() + Duration::from_secs(2);
        while store.count(Table::Interactions) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(store.count(Table::Interactions), 1);
    }

    #[tokio::test]
    async fn test_timer_feeds_processing_time() {
        let store = Arc::new(MemoryStore::new());
        let logger = InteractionLogger::new(store.clone(), fast_settings());

        let timer = logger.start_timer();
        tokio::time::sleep(Duration::from_millis(10)).await;
        logger.log_interaction(sample_interaction(), None, Some(&timer));

        assert!(eventually(|| store.count(Table::Interactions) == 1).await);
        let ms = store.rows(Table::Interactions)[0]["processing_time_ms"]
            .as_u64()
            .unwrap();
        assert!(ms >= 10);
    }
}
