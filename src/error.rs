//! # Errors
//!
//! Error taxonomy surfaced by [`crate::stack::StackReconciler`].
//!
//! Control-plane and configuration errors are wrapped without rewriting so
//! callers see the remote message verbatim.

use crate::config::ConfigError;
use crate::provider::ControlPlaneError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackError {
    /// Caller omitted required configuration
    #[error("{0}")]
    Usage(String),

    /// Request rejected locally before reaching the control plane
    #[error("{0}")]
    Validation(String),

    /// Creation failed and the control plane removed the partial stack
    #[error("{0}")]
    Create(String),

    /// Update failed and the stack was rolled back to its previous state
    #[error("{0}")]
    Update(String),

    #[error("Stack {stack} is in an unrecoverable state ({status})")]
    Unrecoverable { stack: String, status: String },

    #[error("Stack {stack} is busy ({status}), try again soon")]
    Busy { stack: String, status: String },

    #[error("Error decrypting secret '{name}' from '{document}': {source}")]
    Decryption {
        name: String,
        document: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StackError {
    /// Whether re-running the same operation later can succeed without manual intervention
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StackError::Create(_) | StackError::Update(_) | StackError::Busy { .. }
        )
    }

    /// Short label used for metrics and structured logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            StackError::Usage(_) => "usage",
            StackError::Validation(_) => "validation",
            StackError::Create(_) => "create",
            StackError::Update(_) => "update",
            StackError::Unrecoverable { .. } => "unrecoverable",
            StackError::Busy { .. } => "busy",
            StackError::Decryption { .. } => "decryption",
            StackError::ControlPlane(_) => "control_plane",
            StackError::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(StackError::Create("gone".to_string()).is_retryable());
        assert!(StackError::Update("rolled back".to_string()).is_retryable());
        assert!(StackError::Busy {
            stack: "app-production".to_string(),
            status: "UPDATE_IN_PROGRESS".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(!StackError::Usage("no template".to_string()).is_retryable());
        assert!(!StackError::Validation("too long".to_string()).is_retryable());
        assert!(!StackError::Unrecoverable {
            stack: "app-production".to_string(),
            status: "UPDATE_ROLLBACK_FAILED".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn test_busy_message_mentions_retry() {
        let err = StackError::Busy {
            stack: "app-non-production".to_string(),
            status: "CREATE_IN_PROGRESS".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Stack app-non-production is busy (CREATE_IN_PROGRESS), try again soon"
        );
        assert_eq!(err.kind(), "busy");
    }
}
