//! The six pipeline stages and the orchestrator that sequences them.

pub mod confidence;
pub mod escalation;
pub mod generator;
pub mod intent;
pub mod orchestrator;
pub mod router;

pub use confidence::{ConfidenceAssessment, ConfidenceScorer};
pub use escalation::{EscalationDetails, EscalationHandler, EscalationOutcome};
pub use generator::{GeneratedResponse, GenerationRequest, ResponseGenerator};
pub use intent::IntentClassifier;
pub use orchestrator::{Pipeline, PipelineResponse, TurnRequest};
pub use router::{route, Router, RoutingDecision};
