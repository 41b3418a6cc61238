//! # Sync Run
//!
//! One active or historical synchronization attempt for an entity/direction
//! pair. The persisted run is the only continuity between invocations, so it
//! carries the resume cursor (`next_offset`), the in-flight batch claim and a
//! version counter for compare-and-swap commits.

use crate::state_machine::SyncStatus;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Direction of data flow between the two systems of record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    RemoteToLocal,
    LocalToRemote,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::RemoteToLocal => "remote_to_local",
            Direction::LocalToRemote => "local_to_remote",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remote_to_local" => Ok(Self::RemoteToLocal),
            "local_to_remote" => Ok(Self::LocalToRemote),
            _ => Err(format!("Invalid sync direction: {s}")),
        }
    }
}

/// Handle returned by `start`/`resume`, used to drive subsequent invocations
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunHandle {
    pub operation_id: String,
    pub entity: String,
    pub direction: Direction,
}

/// Slice of items transferred by one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub offset: u64,
    pub limit: usize,
    pub batch_index: u64,
}

/// Claim on the batch currently being transferred
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InFlightBatch {
    pub batch_index: u64,
    pub claim_id: String,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub operation_id: String,
    pub entity: String,
    pub direction: Direction,
    pub filters: Value,
    pub status: SyncStatus,
    pub batch_size: usize,
    pub current_batch: u64,
    pub total_batches: u64,
    pub next_offset: u64,
    pub items_synced: u64,
    pub items_skipped: u64,
    pub total_items: u64,
    pub errors: u64,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub in_flight: Option<InFlightBatch>,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl SyncRun {
    /// Create a new idle run with a fresh operation id
    pub fn new(entity: impl Into<String>, direction: Direction, filters: Value) -> Self {
        let now = Utc::now();
        Self {
            operation_id: Uuid::new_v4().to_string(),
            entity: entity.into(),
            direction,
            filters,
            status: SyncStatus::Idle,
            batch_size: 0,
            current_batch: 0,
            total_batches: 0,
            next_offset: 0,
            items_synced: 0,
            items_skipped: 0,
            total_items: 0,
            errors: 0,
            start_time: now,
            last_update: now,
            in_flight: None,
            version: 0,
            failure_reason: None,
        }
    }

    /// `ceil(total_items / batch_size)`
    pub fn batches_for(total_items: u64, batch_size: usize) -> u64 {
        if batch_size == 0 {
            return 0;
        }
        total_items.div_ceil(batch_size as u64)
    }

    /// Apply a count result and batch size to derive the batch plan
    pub fn plan(&mut self, total_items: u64, batch_size: usize) {
        self.total_items = total_items;
        self.batch_size = batch_size;
        self.total_batches = Self::batches_for(total_items, batch_size);
    }

    pub fn handle(&self) -> RunHandle {
        RunHandle {
            operation_id: self.operation_id.clone(),
            entity: self.entity.clone(),
            direction: self.direction,
        }
    }

    pub fn in_progress(&self) -> bool {
        self.status.is_in_progress()
    }

    /// All counted batches processed
    pub fn batches_exhausted(&self) -> bool {
        self.current_batch >= self.total_batches
    }

    /// All counted items synced
    pub fn items_exhausted(&self) -> bool {
        self.items_synced >= self.total_items
    }

    /// Completion predicate: either condition suffices
    pub fn is_complete(&self) -> bool {
        self.batches_exhausted() || self.items_exhausted()
    }

    /// True when exactly one of the two completion conditions holds
    pub fn completion_conditions_disagree(&self) -> bool {
        self.batches_exhausted() != self.items_exhausted()
    }

    pub fn next_plan(&self) -> BatchPlan {
        BatchPlan {
            offset: self.next_offset,
            limit: self.batch_size,
            batch_index: self.current_batch,
        }
    }

    /// No progress heartbeat within `threshold`
    pub fn is_stale(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_update > threshold
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.total_items == 0 {
            return if self.status == SyncStatus::Completed {
                100.0
            } else {
                0.0
            };
        }
        ((self.items_synced as f64 / self.total_items as f64) * 100.0).min(100.0)
    }

    /// Mark a committed batch, keeping `current_batch <= total_batches`
    pub fn advance(&mut self, processed: u64, skipped: u64, errors: u64, limit: usize) {
        self.current_batch = (self.current_batch + 1).min(self.total_batches);
        self.next_offset += limit as u64;
        self.items_synced += processed;
        self.items_skipped += skipped;
        self.errors += errors;
        self.last_update = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn running_run(total_items: u64, batch_size: usize) -> SyncRun {
        let mut run = SyncRun::new("products", Direction::RemoteToLocal, json!({}));
        run.plan(total_items, batch_size);
        run.status = SyncStatus::Running;
        run
    }

    #[test]
    fn test_batches_for_rounds_up() {
        assert_eq!(SyncRun::batches_for(0, 50), 0);
        assert_eq!(SyncRun::batches_for(1, 50), 1);
        assert_eq!(SyncRun::batches_for(100, 50), 2);
        assert_eq!(SyncRun::batches_for(101, 50), 3);
        assert_eq!(SyncRun::batches_for(10, 0), 0);
    }

    #[test]
    fn test_completion_predicate_either_condition() {
        let mut run = running_run(100, 50);
        assert!(!run.is_complete());

        run.advance(50, 0, 0, 50);
        assert!(!run.is_complete());

        // Items exhausted before batches
        run.items_synced = 100;
        assert!(run.is_complete());
        assert!(run.completion_conditions_disagree());

        // Batches exhausted with items undercounted
        let mut run = running_run(100, 50);
        run.advance(10, 40, 0, 50);
        run.advance(10, 40, 0, 50);
        assert!(run.batches_exhausted());
        assert!(!run.items_exhausted());
        assert!(run.is_complete());
    }

    #[test]
    fn test_advance_moves_cursor() {
        let mut run = running_run(120, 50);
        let plan = run.next_plan();
        assert_eq!(plan.offset, 0);
        assert_eq!(plan.batch_index, 0);

        run.advance(48, 2, 0, plan.limit);
        let plan = run.next_plan();
        assert_eq!(plan.offset, 50);
        assert_eq!(plan.batch_index, 1);
        assert_eq!(run.items_skipped, 2);
    }

    #[test]
    fn test_current_batch_never_exceeds_total() {
        let mut run = running_run(10, 50);
        run.advance(10, 0, 0, 50);
        run.advance(0, 0, 0, 50);
        assert_eq!(run.current_batch, run.total_batches);
    }

    #[test]
    fn test_staleness() {
        let mut run = running_run(10, 5);
        let now = Utc::now();
        run.last_update = now - Duration::hours(2);
        assert!(run.is_stale(Duration::hours(1), now));
        run.last_update = now - Duration::minutes(5);
        assert!(!run.is_stale(Duration::hours(1), now));
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!(
            "local_to_remote".parse::<Direction>().unwrap(),
            Direction::LocalToRemote
        );
        assert!("sideways".parse::<Direction>().is_err());
    }
}
