use std::collections::BTreeSet;
use std::fmt;

use folio_core::error::FolioError;
use folio_core::types::ExecutionPlan;
use folio_index::Handbook;

/// Body of the first fenced code block in `text`, preferring a ```json fence.
pub fn extract_fenced_json(text: &str) -> Option<&str> {
    let (open, skip) = match text.find("```json") {
        Some(i) => (i, "```json".len()),
        None => (text.find("```")?, 3),
    };
    let after = &text[open + skip..];
    // Drop an info string such as "JSON" on the opening line
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let close = body.find("```")?;
    let json = body[..close].trim();
    (!json.is_empty()).then_some(json)
}

/// The plan JSON carried by raw model output.
pub fn extract_plan_json(output: &str) -> Result<&str, PlanFailure> {
    if output.trim().is_empty() {
        return Err(PlanFailure::EmptyOutput);
    }
    extract_fenced_json(output).ok_or(PlanFailure::NoJsonBlock)
}

/// Why a model response could not be turned into an executable plan.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanFailure {
    EmptyOutput,
    NoJsonBlock,
    Unparseable(String),
    NoSteps,
    NoInvocations,
    UnknownOperations(Vec<String>),
}

impl fmt::Display for PlanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyOutput => write!(f, "the response was empty"),
            Self::NoJsonBlock => write!(f, "the response contained no fenced ```json block"),
            Self::Unparseable(e) => write!(f, "the JSON block is not a valid plan: {}", e),
            Self::NoSteps => write!(f, "the plan has no steps"),
            Self::NoInvocations => write!(f, "the plan does not invoke any operation"),
            Self::UnknownOperations(ops) => write!(
                f,
                "the plan references operations that are not allowed: {}",
                ops.join(", ")
            ),
        }
    }
}

impl From<PlanFailure> for FolioError {
    fn from(failure: PlanFailure) -> Self {
        match failure {
            PlanFailure::UnknownOperations(ops) => FolioError::PlanValidation(
                ops.into_iter()
                    .map(|op| format!("unknown operation: {}", op))
                    .collect(),
            ),
            other => FolioError::MalformedPlan(other.to_string()),
        }
    }
}

/// Structural and referential checks against the allowed operation set.
#[derive(Debug, Clone)]
pub struct PlanValidator {
    allowed: BTreeSet<String>,
}

impl PlanValidator {
    pub fn new(allowed: BTreeSet<String>) -> Self {
        Self { allowed }
    }

    pub fn from_handbook(handbook: &Handbook) -> Self {
        Self::new(handbook.allowed_operations())
    }

    /// Deserialize a plan from its JSON text and validate it.
    pub fn check(&self, json: &str) -> Result<ExecutionPlan, PlanFailure> {
        let plan: ExecutionPlan =
            serde_json::from_str(json).map_err(|e| PlanFailure::Unparseable(e.to_string()))?;
        self.validate(&plan)?;
        Ok(plan)
    }

    pub fn validate(&self, plan: &ExecutionPlan) -> Result<(), PlanFailure> {
        if plan.steps.is_empty() {
            return Err(PlanFailure::NoSteps);
        }
        if plan.invocation_count() == 0 {
            return Err(PlanFailure::NoInvocations);
        }
        let unknown: BTreeSet<&str> = plan
            .operation_ids()
            .filter(|op| !self.allowed.contains(*op))
            .collect();
        if !unknown.is_empty() {
            return Err(PlanFailure::UnknownOperations(
                unknown.into_iter().map(str::to_string).collect(),
            ));
        }
        Ok(())
    }
}
