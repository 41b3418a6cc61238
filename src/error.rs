//! # Error Types
//!
//! Crate-wide error taxonomy for sync orchestration.
//!
//! Every public operation returns [`Result`]. Errors carry enough context
//! (entity, direction, operation id, lock diagnostics) for automated recovery
//! tooling, and [`SyncError::code`] gives a stable machine-readable code.
//! [`OperationResponse`] is the structured success/failure envelope handed to
//! trigger surfaces.

use crate::config::ConfigurationError;
use crate::models::{Direction, LockRecord};
use crate::orchestration::retry_policy::ErrorKind;
use crate::state_machine::StateMachineError;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Diagnostic context attached to failures surfaced to callers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncErrorContext {
    pub entity: Option<String>,
    pub direction: Option<Direction>,
    pub operation_id: Option<String>,
    pub lock_holder: Option<LockRecord>,
}

impl SyncErrorContext {
    pub fn for_entity(entity: impl Into<String>) -> Self {
        Self {
            entity: Some(entity.into()),
            ..Default::default()
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_operation(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// Caller must fix the input; never retried
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        context: SyncErrorContext,
    },

    /// Another run holds the entity lock
    #[error("Concurrency error: {message}")]
    Concurrency {
        message: String,
        context: SyncErrorContext,
    },

    #[error("Timeout error: {operation} - {message}")]
    Timeout { operation: String, message: String },

    /// A batch produced only errors; the run was aborted
    #[error("Fatal batch error at batch {batch_index}: {message}")]
    FatalBatch {
        batch_index: u64,
        message: String,
        context: SyncErrorContext,
    },

    #[error("Memory error: {message} ({used_bytes} of {limit_bytes} bytes)")]
    Memory {
        message: String,
        used_bytes: u64,
        limit_bytes: u64,
    },

    #[error("Dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failure reported by an external collaborator, already classified
    #[error("Collaborator error ({kind}): {message}")]
    Collaborator { kind: ErrorKind, message: String },

    #[error("State transition error: {0}")]
    StateTransition(String),
}

impl SyncError {
    pub fn validation(message: impl Into<String>, context: SyncErrorContext) -> Self {
        Self::Validation {
            message: message.into(),
            context,
        }
    }

    pub fn collaborator(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Collaborator {
            kind,
            message: message.into(),
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::Concurrency { .. } => "concurrency_error",
            Self::Timeout { .. } => "timeout_error",
            Self::FatalBatch { .. } => "fatal_batch_error",
            Self::Memory { .. } => "memory_error",
            Self::Cycle { .. } => "cycle_error",
            Self::NotFound(_) => "not_found",
            Self::Store(_) => "store_error",
            Self::Configuration(_) => "configuration_error",
            Self::Collaborator { .. } => "collaborator_error",
            Self::StateTransition(_) => "state_transition_error",
        }
    }

    /// Retry table key for this error, `None` when it must never be retried locally
    pub fn retry_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Timeout { .. } => Some(ErrorKind::Timeout),
            Self::Collaborator { kind, .. } => Some(*kind),
            Self::Concurrency { .. } => Some(ErrorKind::Concurrency),
            Self::Memory { .. } => Some(ErrorKind::Memory),
            Self::Validation { .. } => Some(ErrorKind::Validation),
            _ => None,
        }
    }

    /// Whether the error class is transient (network, timeout, ssl, server, rate limit)
    pub fn is_transient(&self) -> bool {
        self.retry_kind().is_some_and(ErrorKind::is_transient)
    }

    pub fn context(&self) -> Option<&SyncErrorContext> {
        match self {
            Self::Validation { context, .. }
            | Self::Concurrency { context, .. }
            | Self::FatalBatch { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<ConfigurationError> for SyncError {
    fn from(err: ConfigurationError) -> Self {
        SyncError::Configuration(err.to_string())
    }
}

impl From<StateMachineError> for SyncError {
    fn from(err: StateMachineError) -> Self {
        SyncError::StateTransition(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Store(StoreError::Serialization(err.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Structured result envelope for trigger surfaces and recovery tooling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    pub success: bool,
    pub message: String,
    pub error_code: Option<String>,
    pub context: SyncErrorContext,
    pub data: Option<serde_json::Value>,
}

impl OperationResponse {
    pub fn ok(message: impl Into<String>, context: SyncErrorContext) -> Self {
        Self {
            success: true,
            message: message.into(),
            error_code: None,
            context,
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Build a failure response, merging context carried by the error over the caller's
    pub fn from_error(error: &SyncError, fallback: SyncErrorContext) -> Self {
        let context = match error.context() {
            Some(ctx) => SyncErrorContext {
                entity: ctx.entity.clone().or(fallback.entity),
                direction: ctx.direction.or(fallback.direction),
                operation_id: ctx.operation_id.clone().or(fallback.operation_id),
                lock_holder: ctx.lock_holder.clone().or(fallback.lock_holder),
            },
            None => fallback,
        };

        Self {
            success: false,
            message: error.to_string(),
            error_code: Some(error.code().to_string()),
            context,
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            SyncError::validation("bad", SyncErrorContext::default()).code(),
            "validation_error"
        );
        assert_eq!(
            SyncError::Cycle {
                path: vec!["a".into(), "b".into(), "a".into()]
            }
            .code(),
            "cycle_error"
        );
        assert_eq!(SyncError::NotFound("run".into()).code(), "not_found");
    }

    #[test]
    fn test_cycle_message_lists_path() {
        let err = SyncError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn test_retry_kind_classification() {
        let network = SyncError::collaborator(ErrorKind::Network, "connection reset");
        assert_eq!(network.retry_kind(), Some(ErrorKind::Network));
        assert!(network.is_transient());

        let validation = SyncError::validation("bad entity", SyncErrorContext::default());
        assert!(!validation.is_transient());

        assert_eq!(SyncError::NotFound("x".into()).retry_kind(), None);
    }

    #[test]
    fn test_response_merges_error_context() {
        let err = SyncError::Concurrency {
            message: "locked".into(),
            context: SyncErrorContext::for_entity("products"),
        };
        let response = OperationResponse::from_error(
            &err,
            SyncErrorContext::default()
                .with_direction(Direction::RemoteToLocal)
                .with_operation("op-1"),
        );

        assert!(!response.success);
        assert_eq!(response.error_code.as_deref(), Some("concurrency_error"));
        assert_eq!(response.context.entity.as_deref(), Some("products"));
        assert_eq!(response.context.direction, Some(Direction::RemoteToLocal));
        assert_eq!(response.context.operation_id.as_deref(), Some("op-1"));
    }
}
