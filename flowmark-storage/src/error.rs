//! Storage error types.

use flowmark_core::{AuditError, CoreError};
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("workflow definition not found: {name} (searched {root})")]
    DefinitionNotFound { name: String, root: PathBuf },

    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl StorageError {
    /// Returns a stable error code for display and scripting.
    pub fn error_code(&self) -> &'static str {
        match self {
            StorageError::Io(_) => "IO_ERROR",
            StorageError::Json(_) | StorageError::Yaml(_) => "INVALID_DEFINITION",
            StorageError::DefinitionNotFound { .. } => "DEFINITION_NOT_FOUND",
            StorageError::Core(e) => e.error_code(),
        }
    }
}

impl From<AuditError> for StorageError {
    fn from(e: AuditError) -> Self {
        StorageError::Core(CoreError::Audit(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = StorageError::DefinitionNotFound {
            name: "orders".to_string(),
            root: PathBuf::from("/tmp/workflows"),
        };
        assert_eq!(err.error_code(), "DEFINITION_NOT_FOUND");
        assert!(err.to_string().contains("orders"));

        let err: StorageError = CoreError::GuardBlocked {
            transition: "submit".to_string(),
        }
        .into();
        assert_eq!(err.error_code(), "GUARD_BLOCKED");

        let err: StorageError = AuditError::Backend("disk full".to_string()).into();
        assert_eq!(err.error_code(), "AUDIT_IO_ERROR");
    }
}
