//! Core error types.

use crate::dispatch::EventType;
use thiserror::Error;

/// Boxed error returned by user-supplied lifecycle handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from the transition engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid workflow definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("transition \"{transition}\" is not allowed from state \"{state}\"")]
    TransitionNotAllowed { transition: String, state: String },

    #[error("transition \"{transition}\" blocked by guard")]
    GuardBlocked { transition: String },

    #[error("{event} handler failed for transition \"{transition}\": {source}")]
    Handler {
        event: EventType,
        transition: String,
        #[source]
        source: HandlerError,
    },

    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CoreError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        CoreError::InvalidDefinition {
            reason: reason.into(),
        }
    }

    /// Returns whether the caller may retry after changing entity state or context.
    ///
    /// Definition errors are fatal; a rejected or blocked transition is not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::TransitionNotAllowed { .. } | CoreError::GuardBlocked { .. }
        )
    }

    /// Returns a stable error code for display and scripting.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidDefinition { .. } => "INVALID_DEFINITION",
            CoreError::TransitionNotAllowed { .. } => "TRANSITION_NOT_ALLOWED",
            CoreError::GuardBlocked { .. } => "GUARD_BLOCKED",
            CoreError::Handler { .. } => "HANDLER_ERROR",
            CoreError::Audit(_) => "AUDIT_IO_ERROR",
            CoreError::Json(_) => "INVALID_DEFINITION",
            CoreError::Yaml(_) => "INVALID_DEFINITION",
        }
    }
}

/// Errors raised by audit trail backends.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("audit backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = CoreError::TransitionNotAllowed {
            transition: "confirm".to_string(),
            state: "draft".to_string(),
        };
        assert_eq!(err.error_code(), "TRANSITION_NOT_ALLOWED");
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "transition \"confirm\" is not allowed from state \"draft\""
        );

        let err = CoreError::invalid("initial place 'x' is not declared");
        assert_eq!(err.error_code(), "INVALID_DEFINITION");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_handler_error_source() {
        let err = CoreError::Handler {
            event: EventType::Completed,
            transition: "publish".to_string(),
            source: "mailer offline".into(),
        };
        assert_eq!(
            err.to_string(),
            "COMPLETED handler failed for transition \"publish\": mailer offline"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
