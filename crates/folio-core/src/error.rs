use thiserror::Error;

#[derive(Debug, Error)]
pub enum FolioError {
    // Lookup errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation not registered: {0}")]
    OperationNotFound(String),

    // Plan validation errors
    #[error("Plan validation failed: {}", .0.join("; "))]
    PlanValidation(Vec<String>),

    #[error("Malformed plan: {0}")]
    MalformedPlan(String),

    // Execution errors
    #[error("Operation {operation} failed: {message}")]
    ExecutionFailed { operation: String, message: String },

    #[error("Operation timeout after {timeout_secs}s: {operation}")]
    OperationTimeout { operation: String, timeout_secs: u64 },

    #[error("Plan generation failed after {attempts} attempts: {reason}")]
    PlanExhausted { attempts: usize, reason: String },

    #[error("LLM request failed: {0}")]
    Llm(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    // Storage errors
    #[error("Graph storage error: {0}")]
    Storage(String),

    #[error("Graph backend unavailable: {0}")]
    GraphUnavailable(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse error classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ValidationError,
    ExecutionError,
    IoError,
    ConfigurationError,
}

impl FolioError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::OperationNotFound(_) => ErrorKind::NotFound,
            Self::PlanValidation(_) | Self::MalformedPlan(_) => ErrorKind::ValidationError,
            Self::ExecutionFailed { .. }
            | Self::OperationTimeout { .. }
            | Self::PlanExhausted { .. }
            | Self::Llm(_)
            | Self::Cancelled
            | Self::Timeout(_) => ErrorKind::ExecutionError,
            Self::Storage(_) | Self::GraphUnavailable(_) | Self::Io(_) | Self::Json(_) => {
                ErrorKind::IoError
            }
            Self::Config(_) | Self::ConfigNotFound(_) => ErrorKind::ConfigurationError,
        }
    }

    /// The operation this error is attributed to, if any.
    pub fn operation(&self) -> Option<&str> {
        match self {
            Self::ExecutionFailed { operation, .. } | Self::OperationTimeout { operation, .. } => {
                Some(operation)
            }
            Self::OperationNotFound(op) => Some(op),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FolioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(FolioError::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            FolioError::PlanValidation(vec!["bad".into()]).kind(),
            ErrorKind::ValidationError
        );
        assert_eq!(
            FolioError::PlanExhausted {
                attempts: 3,
                reason: "no json".into()
            }
            .kind(),
            ErrorKind::ExecutionError
        );
        assert_eq!(
            FolioError::GraphUnavailable("off".into()).kind(),
            ErrorKind::IoError
        );
        assert_eq!(
            FolioError::Config("missing".into()).kind(),
            ErrorKind::ConfigurationError
        );
    }

    #[test]
    fn test_execution_failed_carries_operation() {
        let err = FolioError::ExecutionFailed {
            operation: "getOrder".into(),
            message: "HTTP 500".into(),
        };
        assert_eq!(err.operation(), Some("getOrder"));
        assert_eq!(err.to_string(), "Operation getOrder failed: HTTP 500");
    }

    #[test]
    fn test_plan_validation_message_joins_issues() {
        let err = FolioError::PlanValidation(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Plan validation failed: a; b");
    }
}
