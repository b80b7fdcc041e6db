//! Records and enums shared by every pipeline stage.
//!
//! `Interaction` and `Escalation` are the persisted shapes handed to the
//! durable store; everything else is transient per-turn data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Enumerations
// ============================================================================

/// Which audience the assistant is serving for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistantMode {
    Customer,
    Banker,
}

impl AssistantMode {
    pub const ALL: [AssistantMode; 2] = [AssistantMode::Customer, AssistantMode::Banker];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssistantMode::Customer => "customer",
            AssistantMode::Banker => "banker",
        }
    }
}

impl fmt::Display for AssistantMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssistantMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "customer" => Ok(AssistantMode::Customer),
            "banker" => Ok(AssistantMode::Banker),
            other => Err(format!("Invalid assistant mode: {}", other)),
        }
    }
}

/// Risk category attached to every intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    /// Safe to answer automatically.
    Automatable,
    /// Continues through the pipeline but is scrutinised by the detectors.
    Sensitive,
    /// Always handed to a human.
    HumanOnly,
}

impl IntentCategory {
    pub const ALL: [IntentCategory; 3] = [
        IntentCategory::Automatable,
        IntentCategory::Sensitive,
        IntentCategory::HumanOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::Automatable => "automatable",
            IntentCategory::Sensitive => "sensitive",
            IntentCategory::HumanOnly => "human_only",
        }
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IntentCategory::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Invalid intent category: {}", s))
    }
}

/// Reason a turn was handed to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    HumanOnly,
    LowConfidence,
    InsufficientEvidence,
    /// Enumerated for manual use; never auto-detected.
    ConflictingEvidence,
    AccountSpecific,
    SecurityFraud,
    FinancialAdvice,
    LegalHardship,
    EmotionalDistress,
    RepeatedMisunderstanding,
    ExplicitHumanRequest,
}

impl TriggerType {
    pub const ALL: [TriggerType; 11] = [
        TriggerType::HumanOnly,
        TriggerType::LowConfidence,
        TriggerType::InsufficientEvidence,
        TriggerType::ConflictingEvidence,
        TriggerType::AccountSpecific,
        TriggerType::SecurityFraud,
        TriggerType::FinancialAdvice,
        TriggerType::LegalHardship,
        TriggerType::EmotionalDistress,
        TriggerType::RepeatedMisunderstanding,
        TriggerType::ExplicitHumanRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::HumanOnly => "human_only",
            TriggerType::LowConfidence => "low_confidence",
            TriggerType::InsufficientEvidence => "insufficient_evidence",
            TriggerType::ConflictingEvidence => "conflicting_evidence",
            TriggerType::AccountSpecific => "account_specific",
            TriggerType::SecurityFraud => "security_fraud",
            TriggerType::FinancialAdvice => "financial_advice",
            TriggerType::LegalHardship => "legal_hardship",
            TriggerType::EmotionalDistress => "emotional_distress",
            TriggerType::RepeatedMisunderstanding => "repeated_misunderstanding",
            TriggerType::ExplicitHumanRequest => "explicit_human_request",
        }
    }

    /// Parse a raw trigger name, coercing anything outside the enumeration
    /// to `HumanOnly`.
    pub fn normalize(raw: &str) -> TriggerType {
        raw.parse().unwrap_or(TriggerType::HumanOnly)
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TriggerType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown trigger type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Resolved,
    Escalated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Continue,
    Escalate,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Continue => "continue",
            Route::Escalate => "escalate",
        }
    }
}

// ============================================================================
// Conversation + citations
// ============================================================================

/// One prior turn of the conversation, as supplied by the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
    /// Whether the assistant turn ended in an escalation.
    #[serde(default)]
    pub escalated: bool,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            escalated: false,
        }
    }

    pub fn assistant(content: impl Into<String>, escalated: bool) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            escalated,
        }
    }

    /// Only user/assistant turns are ever forwarded to a judge.
    pub fn is_dialogue(&self) -> bool {
        self.role == "user" || self.role == "assistant"
    }
}

/// Numbered reference tying a `[n]` marker in generated text to a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub number: u32,
    /// Internal file identifier from the retrieval backend (`file-...`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    /// Display title or URL.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Citation {
    /// Stand-in for a marker the retrieval result has no record for.
    pub fn placeholder(number: u32) -> Self {
        Self {
            number,
            source_id: None,
            quote: None,
            source: format!("Source {}", number),
            url: None,
        }
    }
}

/// Validated classifier output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent_name: String,
    pub intent_category: IntentCategory,
    pub classification_reason: String,
}

// ============================================================================
// Persisted records
// ============================================================================

/// One record per user turn processed by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub assistant_mode: AssistantMode,
    pub session_id: Option<String>,
    pub user_query: String,
    pub intent_name: Option<String>,
    pub intent_category: Option<IntentCategory>,
    pub classification_reason: Option<String>,
    pub step_1_intent_completed: bool,
    pub step_2_routing_decision: Option<Route>,
    pub step_3_retrieval_performed: bool,
    pub step_4_response_generated: bool,
    pub step_5_confidence_score: Option<f64>,
    pub step_6_escalation_triggered: bool,
    pub outcome: Outcome,
    pub confidence_score: Option<f64>,
    pub escalation_reason: Option<String>,
    pub response_text: Option<String>,
    pub citations: Option<Vec<Citation>>,
    pub retrieved_chunks_count: usize,
    pub processing_time_ms: Option<u64>,
    pub response_generation_time_ms: Option<u64>,
}

/// Child record of an escalated interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub interaction_id: String,
    pub trigger_type: TriggerType,
    pub escalation_reason: String,
    pub created_at: DateTime<Utc>,
}
