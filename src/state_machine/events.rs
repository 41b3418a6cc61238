use serde::{Deserialize, Serialize};

/// Events that drive sync run state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SyncEvent {
    /// A trigger requested a new run
    Validate,
    /// Validation passed, request the entity lock
    AcquireLock,
    /// Lock held, count remote items
    Count,
    /// Batch plan derived, begin processing
    Begin,
    /// One batch committed
    BatchCommitted,
    /// Completion predicate satisfied
    Complete,
    /// Finalization done
    Finalize,
    /// Abort with an error message
    Fail(String),
    /// External cancellation observed
    Cancel,
    /// Rehydrate a run from a checkpoint
    Resume,
}

impl SyncEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::AcquireLock => "acquire_lock",
            Self::Count => "count",
            Self::Begin => "begin",
            Self::BatchCommitted => "batch_committed",
            Self::Complete => "complete",
            Self::Finalize => "finalize",
            Self::Fail(_) => "fail",
            Self::Cancel => "cancel",
            Self::Resume => "resume",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Create a failure event with the given error message
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}
