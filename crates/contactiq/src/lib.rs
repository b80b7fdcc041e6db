pub mod analytics;
pub mod backoff;
pub mod config;
pub mod interaction_log;
pub mod judge;
pub mod pipeline;
pub mod retrieval;
pub mod store;
pub mod taxonomy;
pub mod types;
pub mod validation;

// Scripted collaborators for tests and local runs
pub mod testing;

// Re-export primary types for convenience
pub use config::{ConfigError, JudgeSettings, PipelineConfig, RetrieverSettings};
pub use interaction_log::{InteractionLogger, LoggerSettings, LoggerStatsSnapshot};
pub use pipeline::{Pipeline, PipelineResponse, TurnRequest};
pub use types::{
    AssistantMode, Citation, ConversationTurn, Escalation, IntentCategory, IntentResult,
    Interaction, Outcome, Route, TriggerType,
};

// Re-export collaborator boundaries
pub use judge::{Judge, JudgeError, OpenAiJudge};
pub use retrieval::{EvidenceRetriever, HttpRetriever, RetrievalResult};
pub use store::{DurableStore, MemoryStore, StoreError};

// Re-export common types
pub use anyhow::{Error, Result};
pub use uuid::Uuid;
