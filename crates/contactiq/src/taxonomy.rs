//! Intent taxonomies for both assistant modes.

use crate::types::{AssistantMode, IntentCategory};
use crate::types::IntentCategory::{Automatable, HumanOnly, Sensitive};

/// Intents answered with fixed text or no evidence at all.
pub const CONVERSATIONAL_INTENTS: [&str; 3] = ["greeting", "unknown", "general_conversation"];

pub fn is_conversational(intent_name: &str) -> bool {
    CONVERSATIONAL_INTENTS.contains(&intent_name)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentSpec {
    pub name: &'static str,
    pub category: IntentCategory,
    pub description: &'static str,
}

const fn intent(
    name: &'static str,
    category: IntentCategory,
    description: &'static str,
) -> IntentSpec {
    IntentSpec {
        name,
        category,
        description,
    }
}

static CUSTOMER_INTENTS: [IntentSpec; 15] = [
    intent("greeting", Automatable, "Greetings, hello, hi, small talk, conversational openers"),
    intent(
        "general_conversation",
        Automatable,
        "General conversational queries, follow-ups, clarifications that don't require knowledge base",
    ),
    intent("transaction_explanation", Automatable, "Questions about transaction details, codes, descriptions"),
    intent("fee_inquiry", Automatable, "Questions about fees, charges, pricing"),
    intent("account_limits", Automatable, "Questions about account limits, daily limits, transfer limits"),
    intent("card_dispute_process", Automatable, "Guidance on disputing card transactions"),
    intent("application_process", Automatable, "General information about account/product applications"),
    intent("account_balance", Sensitive, "Account balance inquiries (needs authentication)"),
    intent("transaction_history", Sensitive, "Transaction history requests (needs authentication)"),
    intent("password_reset", Sensitive, "Password or security-related requests"),
    intent("financial_advice", HumanOnly, "Requests for personalized financial advice"),
    intent("complaint", HumanOnly, "Formal complaints or grievances"),
    intent("hardship", HumanOnly, "Financial hardship indicators"),
    intent("fraud_alert", HumanOnly, "Security/fraud concerns"),
    intent("unknown", Automatable, "Unclassifiable or out-of-scope queries - provide helpful guidance"),
];

static BANKER_INTENTS: [IntentSpec; 14] = [
    intent("greeting", Automatable, "Greetings, hello, hi, small talk, conversational openers"),
    intent(
        "general_conversation",
        Automatable,
        "General conversational queries, follow-ups, clarifications that don't require knowledge base",
    ),
    intent("policy_lookup", Automatable, "Looking up bank policies, terms, conditions"),
    intent("process_clarification", Automatable, "Process steps, workflows, procedures"),
    intent("product_comparison", Automatable, "Comparing products, features, differences"),
    intent("compliance_phrasing", Automatable, "Guidance on compliant language, disclaimers"),
    intent("fee_structure", Automatable, "Fee schedules, pricing information"),
    intent("eligibility_criteria", Automatable, "Product eligibility requirements"),
    intent("documentation_requirements", Automatable, "Required documents, forms, procedures"),
    intent("customer_specific_query", Sensitive, "Questions requiring access to customer data"),
    intent("complex_case", HumanOnly, "Complex cases requiring expert judgment"),
    intent("complaint_handling", HumanOnly, "Formal complaint procedures"),
    intent("regulatory_question", HumanOnly, "Regulatory or legal questions"),
    intent("unknown", Automatable, "Unclassifiable or out-of-scope queries - provide helpful guidance"),
];

pub fn taxonomy(mode: AssistantMode) -> &'static [IntentSpec] {
    match mode {
        AssistantMode::Customer => &CUSTOMER_INTENTS,
        AssistantMode::Banker => &BANKER_INTENTS,
    }
}

pub fn valid_intents(mode: AssistantMode) -> Vec<&'static str> {
    taxonomy(mode).iter().map(|i| i.name).collect()
}

pub fn lookup(intent_name: &str, mode: AssistantMode) -> Option<&'static IntentSpec> {
    taxonomy(mode).iter().find(|i| i.name == intent_name)
}

/// Category the taxonomy assigns to an intent, if the intent is known.
pub fn expected_category(intent_name: &str, mode: AssistantMode) -> Option<IntentCategory> {
    lookup(intent_name, mode).map(|i| i.category)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_modes_share_conversational_intents() {
        for mode in AssistantMode::ALL {
            for name in CONVERSATIONAL_INTENTS {
                assert_eq!(expected_category(name, mode), Some(Automatable), "{name} in {mode}");
            }
        }
    }

    #[test]
    fn test_mode_specific_intents() {
        assert_eq!(
            expected_category("fraud_alert", AssistantMode::Customer),
            Some(HumanOnly)
        );
        assert_eq!(expected_category("fraud_alert", AssistantMode::Banker), None);
        assert_eq!(
            expected_category("customer_specific_query", AssistantMode::Banker),
            Some(Sensitive)
        );
    }

    #[test]
    fn test_intent_names_are_unique() {
        for mode in AssistantMode::ALL {
            let mut names = valid_intents(mode);
            let total = names.len();
            names.sort();
            names.dedup();
            assert_eq!(names.len(), total);
        }
    }
}
