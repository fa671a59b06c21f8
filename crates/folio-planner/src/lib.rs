//! Retrieval-driven execution planning.
//!
//! A request flows through [`IntentExtractor`] → [`ContextRetriever`] →
//! [`PlanGenerator`] → [`PlanInterpreter`], coordinated per request by the
//! [`Orchestrator`].

pub mod cache;
pub mod extraction;
pub mod interpreter;
pub mod orchestrator;
pub mod plan_generator;
pub mod retrieval;
pub mod validator;

pub use cache::PlanCache;
pub use extraction::{entity_catalog, IntentExtractor, LlmIntentExtractor};
pub use interpreter::{output_key, ExecutionOutcome, InvocationRecord, PlanInterpreter};
pub use orchestrator::{HandledPart, OrchestrationResponse, Orchestrator, UnhandledPart};
pub use plan_generator::PlanGenerator;
pub use retrieval::ContextRetriever;
pub use validator::{extract_fenced_json, extract_plan_json, PlanFailure, PlanValidator};
