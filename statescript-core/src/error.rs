//! Core error types.

use thiserror::Error;

/// Errors from the interpreter.
///
/// Only usage errors surface here. Malformed operands inside an otherwise
/// valid document are recovered where they occur and reported through the
/// evaluation logger instead.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown state: {state}")]
    UnknownState { state: String },

    #[error("missing context: evaluation requires a context object")]
    MissingContext,

    #[error("missing condition: nothing to evaluate")]
    MissingCondition,

    #[error("$reset requires the original context snapshot")]
    MissingOriginalContext,

    #[error("invalid machine definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("invalid condition at '{path}': {reason}")]
    InvalidCondition { path: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CoreError {
    /// Returns an error code suitable for reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::UnknownState { .. } => "UNKNOWN_STATE",
            CoreError::MissingContext => "MISSING_CONTEXT",
            CoreError::MissingCondition => "MISSING_CONDITION",
            CoreError::MissingOriginalContext => "MISSING_ORIGINAL_CONTEXT",
            CoreError::InvalidDefinition { .. } => "BAD_DEFINITION",
            CoreError::InvalidCondition { .. } => "BAD_CONDITION",
            CoreError::Json(_) => "BAD_REQUEST",
            CoreError::Yaml(_) => "BAD_REQUEST",
        }
    }

    /// Returns whether this error was caused by the document rather than the call.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidDefinition { .. }
                | CoreError::InvalidCondition { .. }
                | CoreError::Json(_)
                | CoreError::Yaml(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = CoreError::UnknownState {
            state: "Lobby".to_string(),
        };
        assert_eq!(err.error_code(), "UNKNOWN_STATE");
        assert_eq!(err.to_string(), "unknown state: Lobby");
        assert!(!err.is_definition_error());

        let err = CoreError::InvalidCondition {
            path: "States.Idle.Start.0.Condition".to_string(),
            reason: "ambiguous".to_string(),
        };
        assert_eq!(err.error_code(), "BAD_CONDITION");
        assert!(err.is_definition_error());
    }
}
