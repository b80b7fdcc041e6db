//! Continue-or-escalate routing from the intent category alone.

use serde::Serialize;

use crate::types::{AssistantMode, IntentCategory, Route};

/// Pipeline stage that runs retrieval.
pub const RETRIEVAL_STEP: u8 = 3;
/// Pipeline stage that runs the escalation handler.
pub const ESCALATION_STEP: u8 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub route: Route,
    pub next_step: u8,
    pub skip_to_step: Option<u8>,
    pub reason: String,
}

impl RoutingDecision {
    pub fn is_escalation(&self) -> bool {
        self.route == Route::Escalate
    }
}

/// Route a raw category string. Anything outside the three known categories
/// escalates.
pub fn route(
    intent_category: &str,
    intent_name: Option<&str>,
    mode: Option<AssistantMode>,
) -> RoutingDecision {
    let decision = match intent_category.parse::<IntentCategory>() {
        Ok(category) => decide(category),
        Err(_) => {
            tracing::warn!(category = %intent_category, "Invalid intent category");
            RoutingDecision {
                route: Route::Escalate,
                next_step: ESCALATION_STEP,
                skip_to_step: Some(ESCALATION_STEP),
                reason: "Unknown intent category, defaulting to escalation".to_string(),
            }
        }
    };

    tracing::info!(
        decision = decision.route.as_str(),
        reason = %decision.reason,
        category = %intent_category,
        intent = ?intent_name,
        mode = ?mode.map(|m| m.as_str()),
        "routing_decision"
    );
    decision
}

fn decide(category: IntentCategory) -> RoutingDecision {
    match category {
        IntentCategory::HumanOnly => RoutingDecision {
            route: Route::Escalate,
            next_step: ESCALATION_STEP,
            skip_to_step: Some(ESCALATION_STEP),
            reason: format!("Intent category '{}' requires human handling", category),
        },
        // Sensitive content is left to the escalation detectors.
        IntentCategory::Automatable | IntentCategory::Sensitive => RoutingDecision {
            route: Route::Continue,
            next_step: RETRIEVAL_STEP,
            skip_to_step: None,
            reason: format!("Intent category '{}' can be handled automatically", category),
        },
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Router;

impl Router {
    pub fn new() -> Self {
        Self
    }

    pub fn route(
        &self,
        intent_category: &str,
        intent_name: Option<&str>,
        mode: Option<AssistantMode>,
    ) -> RoutingDecision {
        route(intent_category, intent_name, mode)
    }

    pub fn should_escalate(&self, intent_category: &str) -> bool {
        !matches!(
            intent_category.parse::<IntentCategory>(),
            Ok(IntentCategory::Automatable | IntentCategory::Sensitive)
        )
    }

    pub fn next_step(&self, intent_category: &str) -> u8 {
        if self.should_escalate(intent_category) {
            ESCALATION_STEP
        } else {
            RETRIEVAL_STEP
        }
    }
}
