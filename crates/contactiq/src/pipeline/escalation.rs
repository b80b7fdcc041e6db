//! Escalation Handler
//!
//! Renders the hand-off message for a trigger, and independently detects
//! which triggers a turn exhibits from categorical signals and the raw query.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::types::{AssistantMode, ConversationTurn, IntentCategory, TriggerType};

// ============================================================================
// Message templates
// ============================================================================

const CUSTOMER_CONTACTS: &str = "• Phone: 13 13 14 (24/7)
• Visit your local ANZ branch
• Use ANZ Internet Banking or the ANZ App";

fn customer_template(trigger: TriggerType) -> String {
    match trigger {
        TriggerType::HumanOnly => format!(
            "I understand you're asking about {{topic}}. This requires personalized assistance from our team.\n\nPlease contact ANZ customer service:\n{CUSTOMER_CONTACTS}\n\nOur team will be able to help you with this matter."
        ),
        TriggerType::LowConfidence => format!(
            "I want to make sure I give you the most accurate information about {{topic}}.\n\nFor the most reliable answer, I recommend speaking directly with our customer service team:\n{CUSTOMER_CONTACTS}\n\nThey'll be able to provide you with the most up-to-date and accurate information."
        ),
        TriggerType::InsufficientEvidence => "I don't have enough information to answer your question about {topic} accurately.\n\nTo get the help you need, please contact:\n• ANZ Customer Service: 13 13 14 (24/7)\n• Visit your local ANZ branch\n• Use ANZ Internet Banking or the ANZ App\n\nOur team will be happy to assist you.".to_string(),
        TriggerType::ConflictingEvidence => format!(
            "I found some conflicting information about {{topic}}, and I want to make sure you get the most accurate answer.\n\nPlease contact ANZ customer service for clarification:\n{CUSTOMER_CONTACTS}\n\nThey'll be able to provide you with the correct information."
        ),
        TriggerType::AccountSpecific => "I can't access your personal account information here for security reasons.\n\nTo get help with your account, please:\n• Call ANZ Customer Service: 13 13 14 (24/7)\n• Visit your local ANZ branch\n• Log in to ANZ Internet Banking or the ANZ App\n\nOur team will be able to assist you with your specific account.".to_string(),
        TriggerType::SecurityFraud => "For security and fraud-related matters, it's important to speak directly with our security team.\n\nPlease contact ANZ immediately:\n• Security Hotline: 1800 033 844 (24/7)\n• Report via ANZ Internet Banking or the ANZ App\n• Visit your local ANZ branch\n\nOur security team will help you right away.".to_string(),
        TriggerType::FinancialAdvice => "I can provide general information, but for personalized financial advice, please speak with a qualified financial advisor.\n\nANZ offers financial advice services:\n• Contact ANZ Financial Planning: 1800 989 888\n• Visit your local ANZ branch\n• Book an appointment online\n\nA qualified advisor can help you with your specific situation.".to_string(),
        TriggerType::LegalHardship => "I understand this is an important matter. For legal or financial hardship situations, please speak directly with our specialist team.\n\nPlease contact:\n• Financial Hardship Team: 1800 149 549\n• Visit your local ANZ branch\n• Use ANZ Internet Banking or the ANZ App\n\nOur team will work with you to find a solution.".to_string(),
        TriggerType::EmotionalDistress => format!(
            "I can hear this is important to you. Let me connect you with someone who can help right away.\n\nPlease contact ANZ customer service:\n{CUSTOMER_CONTACTS}\n\nOur team is here to help and support you."
        ),
        TriggerType::RepeatedMisunderstanding => format!(
            "I want to make sure I understand your question correctly. Let me connect you with our team who can help.\n\nPlease contact ANZ customer service:\n{CUSTOMER_CONTACTS}\n\nThey'll be able to assist you better."
        ),
        TriggerType::ExplicitHumanRequest => format!(
            "Of course! I'll connect you with a member of our team.\n\nPlease contact ANZ customer service:\n{CUSTOMER_CONTACTS}\n\nA team member will be happy to help you."
        ),
    }
}

fn banker_template(trigger: TriggerType) -> &'static str {
    match trigger {
        TriggerType::HumanOnly => "This query requires human review and cannot be handled automatically.\n\nPlease escalate to:\n• Senior banker or branch manager\n• Specialist team (if applicable)\n• Compliance team (if regulatory question)\n\nDocument the escalation reason: {reason}",
        TriggerType::LowConfidence => "The confidence score for this response is below threshold ({confidence_score:.2f} < {threshold}).\n\nRecommendation: Escalate to ensure accurate information is provided.\n\nPlease:\n• Review the query and retrieved information\n• Consult policy documents or specialist team if needed\n• Document the escalation reason",
        TriggerType::InsufficientEvidence => "Insufficient information retrieved to answer this query accurately.\n\nPlease:\n• Review available resources\n• Consult with specialist team if needed\n• Escalate if information is not available\n\nDocument the escalation reason: {reason}",
        TriggerType::ConflictingEvidence => "Conflicting information found in retrieved sources.\n\nPlease:\n• Review the conflicting information\n• Consult policy documents or specialist team\n• Escalate for clarification if needed\n\nDocument the escalation reason: {reason}",
        TriggerType::AccountSpecific => "This query requires access to customer-specific account information.\n\nPlease:\n• Access customer account through appropriate systems\n• Follow privacy and security protocols\n• Escalate if additional authorization needed\n\nDocument the escalation reason: {reason}",
        TriggerType::SecurityFraud => "Security or fraud indicators detected.\n\nIMMEDIATE ACTION REQUIRED:\n• Follow security protocols\n• Contact security team immediately\n• Document all details\n• Do not proceed with standard response\n\nEscalate to security team: {reason}",
        TriggerType::FinancialAdvice => "This query may require financial advice considerations.\n\nPlease:\n• Review compliance requirements\n• Consult with qualified financial advisor if needed\n• Escalate if advice is required\n\nDocument the escalation reason: {reason}",
        TriggerType::LegalHardship => "Legal or financial hardship signals detected.\n\nPlease:\n• Follow hardship procedures\n• Consult with hardship specialist team\n• Escalate to appropriate team\n\nDocument the escalation reason: {reason}",
        TriggerType::EmotionalDistress => "Emotional distress or urgent language detected in customer query.\n\nPlease:\n• Handle with sensitivity\n• Prioritize customer support\n• Escalate to specialist team if needed\n\nDocument the escalation reason: {reason}",
        TriggerType::RepeatedMisunderstanding => "Multiple failed interactions detected.\n\nPlease:\n• Review interaction history\n• Escalate to senior staff\n• Consider alternative communication methods\n\nDocument the escalation reason: {reason}",
        TriggerType::ExplicitHumanRequest => "Customer has explicitly requested human assistance.\n\nPlease:\n• Acknowledge the request\n• Transfer to appropriate team member\n• Ensure smooth handoff\n\nDocument the escalation reason: {reason}",
    }
}

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(\w+)(?::\.(\d+)f)?\}").expect("placeholder regex is valid")
});

#[derive(Debug, Clone)]
enum TemplateValue {
    Text(String),
    Number(f64),
}

/// Fill `{name}` / `{name:.Nf}` placeholders. `None` if any placeholder has
/// no value.
fn render(template: &str, values: &HashMap<&str, TemplateValue>) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let whole = caps.get(0)?;
        out.push_str(&template[last..whole.start()]);
        let rendered = match (values.get(&caps[1])?, caps.get(2)) {
            (TemplateValue::Number(n), Some(precision)) => {
                let precision: usize = precision.as_str().parse().ok()?;
                format!("{:.*}", precision, n)
            }
            (TemplateValue::Number(n), None) => n.to_string(),
            (TemplateValue::Text(s), _) => s.clone(),
        };
        out.push_str(&rendered);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Some(out)
}

// ============================================================================
// Trigger detection patterns
// ============================================================================

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).expect("trigger pattern is valid"))
        .collect()
}

static TEXT_TRIGGERS: LazyLock<Vec<(TriggerType, Vec<Regex>)>> = LazyLock::new(|| {
    vec![
        (
            TriggerType::AccountSpecific,
            compile(&[
                r"\bmy account\b",
                r"\bmy balance\b",
                r"\bmy transactions\b",
                r"\baccount number\b",
                r"\bmy card\b",
                r"\bpersonal information\b",
            ]),
        ),
        (
            TriggerType::SecurityFraud,
            compile(&[
                r"\bfraud\b",
                r"\bscam\b",
                r"\bstolen\b",
                r"\blost card\b",
                r"\bunauthorized\b",
                r"\bsuspicious\b",
                r"\bsecurity breach\b",
            ]),
        ),
        (
            TriggerType::FinancialAdvice,
            compile(&[
                r"\bshould i\b",
                r"\bwhat should\b",
                r"\brecommend\b",
                r"\badvice\b",
                r"\bwhat do you think\b",
                r"\bis it good\b",
            ]),
        ),
        (
            TriggerType::LegalHardship,
            compile(&[
                r"\bhardship\b",
                r"\bcan't pay\b",
                r"\bstruggling\b",
                r"\blegal\b",
                r"\blawsuit\b",
                r"\bdispute\b",
                r"\bcomplaint\b",
            ]),
        ),
        (
            TriggerType::EmotionalDistress,
            compile(&[
                r"\burgent\b",
                r"\bemergency\b",
                r"\basap\b",
                r"\bimmediately\b",
                r"\bworried\b",
                r"\bconcerned\b",
                r"\bstressed\b",
                r"\bpanicked\b",
            ]),
        ),
        (
            TriggerType::ExplicitHumanRequest,
            compile(&[
                r"\bspeak to.*human\b",
                r"\btalk to.*person\b",
                r"\bhuman agent\b",
                r"\breal person\b",
                r"\bactual person\b",
                r"\bnot a bot\b",
            ]),
        ),
    ]
});

/// Escalations among the most recent turns needed to flag a misunderstanding loop.
const REPEAT_WINDOW: usize = 3;
const REPEAT_MIN_ESCALATIONS: usize = 2;

// ============================================================================
// Handler
// ============================================================================

/// Context for one escalation. Every field is optional.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscalationDetails<'a> {
    pub intent_name: Option<&'a str>,
    pub reason: Option<&'a str>,
    pub query: Option<&'a str>,
    pub confidence_score: Option<f64>,
    pub evidence: Option<&'a [String]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationOutcome {
    pub escalated: bool,
    pub escalation_message: String,
    pub trigger_type: TriggerType,
    pub escalation_reason: String,
}

#[derive(Debug, Clone)]
pub struct EscalationHandler {
    threshold: f64,
}

impl EscalationHandler {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Render the hand-off for `trigger`. Unrecognised trigger names become
    /// `human_only`.
    pub fn handle_escalation(
        &self,
        trigger: &str,
        mode: AssistantMode,
        details: &EscalationDetails<'_>,
    ) -> EscalationOutcome {
        let trigger_type = TriggerType::normalize(trigger);
        if trigger_type.as_str() != trigger {
            tracing::warn!(trigger = %trigger, "Invalid trigger type");
        }
        self.escalate(trigger_type, mode, details)
    }

    pub fn escalate(
        &self,
        trigger_type: TriggerType,
        mode: AssistantMode,
        details: &EscalationDetails<'_>,
    ) -> EscalationOutcome {
        let escalation_reason = match details.reason {
            Some(reason) if !reason.is_empty() => reason.to_string(),
            _ => self.default_reason(trigger_type, details.intent_name, details.confidence_score),
        };
        tracing::info!(
            trigger = %trigger_type,
            mode = %mode,
            intent = ?details.intent_name,
            reason = %escalation_reason,
            "escalation_triggered"
        );

        let escalation_message = self.message(trigger_type, mode, details.intent_name, &escalation_reason, details.confidence_score);

        EscalationOutcome {
            escalated: true,
            escalation_message,
            trigger_type,
            escalation_reason,
        }
    }

    fn message(
        &self,
        trigger_type: TriggerType,
        mode: AssistantMode,
        intent_name: Option<&str>,
        reason: &str,
        confidence_score: Option<f64>,
    ) -> String {
        let template = match mode {
            AssistantMode::Customer => customer_template(trigger_type),
            AssistantMode::Banker => banker_template(trigger_type).to_string(),
        };
        let topic = match mode {
            AssistantMode::Customer => intent_name.unwrap_or("your question"),
            AssistantMode::Banker => "this query",
        };

        let values = HashMap::from([
            ("topic", TemplateValue::Text(topic.to_string())),
            ("reason", TemplateValue::Text(reason.to_string())),
            ("confidence_score", TemplateValue::Number(confidence_score.unwrap_or(0.0))),
            ("threshold", TemplateValue::Number(self.threshold)),
        ]);

        render(&template, &values).unwrap_or_else(|| {
            tracing::warn!(trigger = %trigger_type, "Escalation message formatting failed");
            template
        })
    }

    fn default_reason(
        &self,
        trigger_type: TriggerType,
        intent_name: Option<&str>,
        confidence_score: Option<f64>,
    ) -> String {
        match trigger_type {
            TriggerType::HumanOnly => format!(
                "Intent category is HumanOnly (intent: {})",
                intent_name.unwrap_or("unknown")
            ),
            TriggerType::LowConfidence => format!(
                "Confidence score {:.2} below threshold {}",
                confidence_score.unwrap_or(0.0),
                self.threshold
            ),
            TriggerType::InsufficientEvidence => "No retrieval results or insufficient information".into(),
            TriggerType::ConflictingEvidence => "Conflicting information in retrieved chunks".into(),
            TriggerType::AccountSpecific => "Account-specific or personal data request".into(),
            TriggerType::SecurityFraud => "Security or fraud indicators detected".into(),
            TriggerType::FinancialAdvice => "Financial advice framing detected".into(),
            TriggerType::LegalHardship => "Legal or financial hardship signals".into(),
            TriggerType::EmotionalDistress => "Emotional distress or urgent language detected".into(),
            TriggerType::RepeatedMisunderstanding => "Multiple failed interactions".into(),
            TriggerType::ExplicitHumanRequest => "User explicitly requested human assistance".into(),
        }
    }

    /// Every trigger the inputs exhibit, in enumeration order.
    ///
    /// `conflicting_evidence` is never detected here; it can only be passed
    /// to [`handle_escalation`](Self::handle_escalation) explicitly.
    pub fn detect_triggers(
        &self,
        query: &str,
        intent_category: Option<IntentCategory>,
        confidence_score: Option<f64>,
        evidence: Option<&[String]>,
        history: Option<&[ConversationTurn]>,
    ) -> Vec<TriggerType> {
        let mut triggers = Vec::new();

        if intent_category == Some(IntentCategory::HumanOnly) {
            triggers.push(TriggerType::HumanOnly);
        }
        if matches!(confidence_score, Some(score) if score < self.threshold) {
            triggers.push(TriggerType::LowConfidence);
        }
        if evidence.map_or(true, <[String]>::is_empty) {
            triggers.push(TriggerType::InsufficientEvidence);
        }
        for (trigger, patterns) in TEXT_TRIGGERS.iter() {
            if patterns.iter().any(|p| p.is_match(query)) {
                triggers.push(*trigger);
            }
        }
        if let Some(history) = history {
            let recent = &history[history.len().saturating_sub(REPEAT_WINDOW)..];
            if recent.iter().filter(|t| t.escalated).count() >= REPEAT_MIN_ESCALATIONS {
                triggers.push(TriggerType::RepeatedMisunderstanding);
            }
        }

        triggers.sort();
        triggers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> EscalationHandler {
        EscalationHandler::new(0.68)
    }

    #[test]
    fn test_every_trigger_renders_without_leftover_placeholders() {
        for mode in AssistantMode::ALL {
            for trigger in TriggerType::ALL {
                let outcome = handler().handle_escalation(trigger.as_str(), mode, &EscalationDetails::default());
                assert!(outcome.escalated);
                assert_eq!(outcome.trigger_type, trigger);
                assert!(!outcome.escalation_message.contains('{'), "{trigger} in {mode}");
                assert!(!outcome.escalation_reason.is_empty());
            }
        }
    }

    #[test]
    fn test_unknown_trigger_coerces_to_human_only() {
        let outcome = handler().handle_escalation("aliens", AssistantMode::Customer, &EscalationDetails::default());
        assert_eq!(outcome.trigger_type, TriggerType::HumanOnly);
        assert!(outcome.escalation_message.contains("your question"));
    }

    #[test]
    fn test_customer_topic_uses_intent_name() {
        let details = EscalationDetails {
            intent_name: Some("complaint"),
            ..Default::default()
        };
        let outcome = handler().escalate(TriggerType::HumanOnly, AssistantMode::Customer, &details);
        assert!(outcome
            .escalation_message
            .starts_with("I understand you're asking about complaint."));
        assert!(outcome.escalation_message.contains("13 13 14"));
        assert_eq!(outcome.escalation_reason, "Intent category is HumanOnly (intent: complaint)");
    }

    #[test]
    fn test_banker_low_confidence_shows_two_decimals() {
        let details = EscalationDetails {
            confidence_score: Some(0.5),
            ..Default::default()
        };
        let outcome = handler().escalate(TriggerType::LowConfidence, AssistantMode::Banker, &details);
        assert!(outcome.escalation_message.contains("(0.50 < 0.68)"));
        assert_eq!(outcome.escalation_reason, "Confidence score 0.50 below threshold 0.68");
    }

    #[test]
    fn test_supplied_reason_is_kept() {
        let details = EscalationDetails {
            reason: Some("Intent category: human_only"),
            ..Default::default()
        };
        let outcome = handler().escalate(TriggerType::HumanOnly, AssistantMode::Banker, &details);
        assert_eq!(outcome.escalation_reason, "Intent category: human_only");
        assert!(outcome
            .escalation_message
            .ends_with("Document the escalation reason: Intent category: human_only"));
    }

    #[test]
    fn test_render_missing_value_returns_none() {
        let values = HashMap::from([("topic", TemplateValue::Text("fees".into()))]);
        assert_eq!(render("About {topic}.", &values).as_deref(), Some("About fees."));
        assert_eq!(render("About {other}.", &values), None);
    }

    #[test]
    fn test_detects_categorical_triggers() {
        let evidence = vec!["chunk".to_string()];
        let found = handler().detect_triggers(
            "What is the fee?",
            Some(IntentCategory::HumanOnly),
            Some(0.4),
            Some(evidence.as_slice()),
            None,
        );
        assert_eq!(found, vec![TriggerType::HumanOnly, TriggerType::LowConfidence]);

        let found = handler().detect_triggers("What is the fee?", None, None, None, None);
        assert_eq!(found, vec![TriggerType::InsufficientEvidence]);
    }

    #[test]
    fn test_detects_text_triggers() {
        let evidence = vec!["chunk".to_string()];
        let detect = |q: &str| handler().detect_triggers(q, None, Some(0.9), Some(evidence.as_slice()), None);

        assert_eq!(detect("What's MY BALANCE?"), vec![TriggerType::AccountSpecific]);
        assert_eq!(detect("I think I got a scam text"), vec![TriggerType::SecurityFraud]);
        assert_eq!(detect("Should I switch to a term deposit?"), vec![TriggerType::FinancialAdvice]);
        assert_eq!(detect("I can't pay my loan"), vec![TriggerType::LegalHardship]);
        assert_eq!(detect("This is urgent"), vec![TriggerType::EmotionalDistress]);
        assert_eq!(detect("Let me speak to a human please"), vec![TriggerType::ExplicitHumanRequest]);
        assert!(detect("What is the foreign transaction fee?").is_empty());

        let many = detect("Urgent: fraud on my card, I want a real person");
        assert_eq!(
            many,
            vec![
                TriggerType::AccountSpecific,
                TriggerType::SecurityFraud,
                TriggerType::EmotionalDistress,
                TriggerType::ExplicitHumanRequest,
            ]
        );
    }

    #[test]
    fn test_repeated_misunderstanding_uses_last_three_turns() {
        let evidence = vec!["chunk".to_string()];
        let history = vec![
            ConversationTurn::assistant("a", true),
            ConversationTurn::assistant("b", true),
            ConversationTurn::user("c"),
            ConversationTurn::assistant("d", false),
        ];
        let found = handler().detect_triggers("hi", None, None, Some(evidence.as_slice()), Some(history.as_slice()));
        assert!(found.is_empty());

        let history = vec![
            ConversationTurn::assistant("a", true),
            ConversationTurn::user("b"),
            ConversationTurn::assistant("c", true),
        ];
        let found = handler().detect_triggers("hi", None, None, Some(evidence.as_slice()), Some(history.as_slice()));
        assert_eq!(found, vec![TriggerType::RepeatedMisunderstanding]);
    }

    #[test]
    fn test_detection_is_idempotent() {
        let run = || {
            handler().detect_triggers(
                "urgent dispute on my account",
                Some(IntentCategory::Sensitive),
                Some(0.2),
                None,
                None,
            )
        };
        assert_eq!(run(), run());
    }
}
