//! Request, outcome and snapshot types exchanged with the sync orchestrator.

use crate::models::{Direction, LockRecord};
use crate::registry::TransferResult;
use crate::state_machine::SyncStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a transferred batch is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchClassification {
    /// Items were processed; commit and move on
    Advance,
    /// Nothing processed, nothing failed, only skips; still a success
    SkippedOnly,
    /// Every item failed; abort the run
    Fatal,
}

impl BatchClassification {
    pub fn classify(result: &TransferResult) -> Self {
        if result.errors > 0 && result.processed == 0 {
            Self::Fatal
        } else if result.processed == 0 && result.errors == 0 && result.skipped > 0 {
            Self::SkippedOnly
        } else {
            Self::Advance
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal)
    }
}

/// Number of batches handled by one `process_next_batch` invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessMode {
    /// Exactly one batch
    Single,
    /// Up to `orchestrator.batches_per_invocation` batches
    Slice,
}

/// Result of one `process_next_batch` invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// Batches committed; more remain
    Progress {
        batches: u32,
        current_batch: u64,
        total_batches: u64,
        items_synced: u64,
        progress_percentage: f64,
    },
    Completed {
        items_synced: u64,
        total_items: u64,
        errors: u64,
    },
    Cancelled,
    /// Another invocation holds a fresh claim on the next batch
    Busy,
}

impl ProcessOutcome {
    /// Whether the run needs further invocations
    pub fn needs_more(&self) -> bool {
        matches!(self, Self::Progress { .. } | Self::Busy)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Cancelled)
    }
}

/// Parameters for `start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    pub entity: String,
    pub direction: Direction,
    #[serde(default)]
    pub filters: Value,
    /// Caller-requested batch size, also honored as an upper limit under memory pressure
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl StartRequest {
    pub fn new(entity: impl Into<String>, direction: Direction) -> Self {
        Self {
            entity: entity.into(),
            direction,
            filters: Value::Object(Default::default()),
            batch_size: None,
        }
    }

    pub fn with_filters(mut self, filters: Value) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

/// Parameters for `resume`
///
/// Without `entity`, the most recently checkpointed entity is resumed.
/// `direction` and `filters` are only consulted when no checkpoint exists and
/// an explicit `offset` is given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeRequest {
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub filters: Option<Value>,
}

impl ResumeRequest {
    pub fn for_entity(entity: impl Into<String>) -> Self {
        Self {
            entity: Some(entity.into()),
            ..Default::default()
        }
    }

    pub fn at_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }
}

/// Diagnostic snapshot of an active run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub operation_id: String,
    pub entity: String,
    pub direction: Direction,
    pub status: SyncStatus,
    pub batch_size: usize,
    pub current_batch: u64,
    pub total_batches: u64,
    pub items_synced: u64,
    pub items_skipped: u64,
    pub total_items: u64,
    pub errors: u64,
    pub progress_percentage: f64,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub is_stale: bool,
    pub batch_in_flight: bool,
    pub lock: Option<LockRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_errors_is_fatal() {
        let result = TransferResult {
            processed: 0,
            skipped: 0,
            errors: 3,
            item_errors: Vec::new(),
        };
        assert_eq!(BatchClassification::classify(&result), BatchClassification::Fatal);
    }

    #[test]
    fn test_skips_only_is_success() {
        let result = TransferResult::processed(0).with_skipped(50);
        assert_eq!(
            BatchClassification::classify(&result),
            BatchClassification::SkippedOnly
        );
    }

    #[test]
    fn test_partial_failure_advances() {
        let result = TransferResult {
            processed: 10,
            skipped: 0,
            errors: 2,
            item_errors: Vec::new(),
        };
        assert_eq!(BatchClassification::classify(&result), BatchClassification::Advance);
        assert_eq!(
            BatchClassification::classify(&TransferResult::default()),
            BatchClassification::Advance
        );
    }

    #[test]
    fn test_outcome_flags() {
        assert!(ProcessOutcome::Busy.needs_more());
        assert!(ProcessOutcome::Cancelled.is_terminal());
        assert!(!ProcessOutcome::Completed {
            items_synced: 1,
            total_items: 1,
            errors: 0
        }
        .needs_more());
    }
}
