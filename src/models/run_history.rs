use super::{Direction, SyncRun};
use crate::state_machine::SyncStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Archived terminal run, kept in a bounded list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    pub operation_id: String,
    pub entity: String,
    pub direction: Direction,
    pub status: SyncStatus,
    pub items_synced: u64,
    pub total_items: u64,
    pub errors: u64,
    pub batches_processed: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub message: Option<String>,
}

impl RunHistoryEntry {
    pub fn from_run(run: &SyncRun, message: Option<String>) -> Self {
        Self {
            operation_id: run.operation_id.clone(),
            entity: run.entity.clone(),
            direction: run.direction,
            status: run.status,
            items_synced: run.items_synced,
            total_items: run.total_items,
            errors: run.errors,
            batches_processed: run.current_batch,
            started_at: run.start_time,
            finished_at: Utc::now(),
            message,
        }
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }
}

/// Append-only per-item error record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncErrorRecord {
    pub operation_id: String,
    pub entity: String,
    /// Item identifier (sku, remote id, ...)
    pub identifier: Option<String>,
    pub error_code: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl SyncErrorRecord {
    pub fn new(
        operation_id: impl Into<String>,
        entity: impl Into<String>,
        identifier: Option<String>,
        error_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            entity: entity.into(),
            identifier,
            error_code: error_code.into(),
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}
