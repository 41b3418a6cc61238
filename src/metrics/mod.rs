//! # Sync Metrics
//!
//! Per-operation counters and completed-operation history. The dependency
//! scheduler reads `last_successful_sync` to decide whether an entity's
//! prerequisites are satisfied.

use crate::models::Direction;
use crate::state_machine::SyncStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Counters for one sync operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub operation_id: String,
    pub entity: String,
    pub direction: Direction,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub items_processed: u64,
    pub items_skipped: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}

impl OperationMetrics {
    pub fn duration_seconds(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    /// Items per second over the whole operation
    pub fn throughput(&self) -> Option<f64> {
        self.duration_seconds()
            .filter(|secs| *secs > 0.0)
            .map(|secs| self.items_processed as f64 / secs)
    }
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn start_operation(&self, operation_id: &str, entity: &str, direction: Direction);

    async fn record_items(&self, operation_id: &str, processed: u64, skipped: u64, errors: u64);

    async fn record_error(&self, operation_id: &str, error_code: &str, message: &str);

    async fn end_operation(&self, operation_id: &str, status: SyncStatus);

    /// Completed operations, newest first, optionally filtered by entity
    async fn history(&self, entity: Option<&str>, limit: usize) -> Vec<OperationMetrics>;

    async fn last_successful_sync(&self, entity: &str) -> Option<DateTime<Utc>>;
}

/// Process-local metrics with a bounded completed history
///
/// The last success per entity is kept outside the bounded history so it
/// survives any number of later operations.
#[derive(Debug)]
pub struct InMemoryMetrics {
    active: DashMap<String, OperationMetrics>,
    completed: Mutex<VecDeque<OperationMetrics>>,
    last_success: DashMap<String, DateTime<Utc>>,
    history_limit: usize,
}

impl Default for InMemoryMetrics {
    fn default() -> Self {
        Self::new(crate::constants::defaults::HISTORY_LIMIT)
    }
}

impl InMemoryMetrics {
    pub fn new(history_limit: usize) -> Self {
        Self {
            active: DashMap::new(),
            completed: Mutex::new(VecDeque::new()),
            last_success: DashMap::new(),
            history_limit: history_limit.max(1),
        }
    }

    pub fn active(&self, operation_id: &str) -> Option<OperationMetrics> {
        self.active.get(operation_id).map(|m| m.value().clone())
    }

    /// Record a successful sync without running one; used to seed prerequisites
    pub fn mark_successful(&self, entity: &str, direction: Direction) {
        let now = Utc::now();
        self.push_completed(OperationMetrics {
            operation_id: uuid::Uuid::new_v4().to_string(),
            entity: entity.to_string(),
            direction,
            started_at: now,
            finished_at: Some(now),
            status: SyncStatus::Completed,
            items_processed: 0,
            items_skipped: 0,
            errors: 0,
            last_error: None,
        });
    }

    fn push_completed(&self, metrics: OperationMetrics) {
        if metrics.status == SyncStatus::Completed {
            if let Some(finished_at) = metrics.finished_at {
                self.last_success
                    .entry(metrics.entity.clone())
                    .and_modify(|at| *at = (*at).max(finished_at))
                    .or_insert(finished_at);
            }
        }
        let mut completed = self.completed.lock();
        completed.push_front(metrics);
        while completed.len() > self.history_limit {
            completed.pop_back();
        }
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetrics {
    async fn start_operation(&self, operation_id: &str, entity: &str, direction: Direction) {
        self.active.insert(
            operation_id.to_string(),
            OperationMetrics {
                operation_id: operation_id.to_string(),
                entity: entity.to_string(),
                direction,
                started_at: Utc::now(),
                finished_at: None,
                status: SyncStatus::Running,
                items_processed: 0,
                items_skipped: 0,
                errors: 0,
                last_error: None,
            },
        );
    }

    async fn record_items(&self, operation_id: &str, processed: u64, skipped: u64, errors: u64) {
        if let Some(mut metrics) = self.active.get_mut(operation_id) {
            metrics.items_processed += processed;
            metrics.items_skipped += skipped;
            metrics.errors += errors;
        }
    }

    async fn record_error(&self, operation_id: &str, error_code: &str, message: &str) {
        if let Some(mut metrics) = self.active.get_mut(operation_id) {
            metrics.errors += 1;
            metrics.last_error = Some(format!("{error_code}: {message}"));
        }
    }

    async fn end_operation(&self, operation_id: &str, status: SyncStatus) {
        if let Some((_, mut metrics)) = self.active.remove(operation_id) {
            metrics.status = status;
            metrics.finished_at = Some(Utc::now());
            self.push_completed(metrics);
        }
    }

    async fn history(&self, entity: Option<&str>, limit: usize) -> Vec<OperationMetrics> {
        self.completed
            .lock()
            .iter()
            .filter(|m| entity.map_or(true, |e| m.entity == e))
            .take(limit)
            .cloned()
            .collect()
    }

    async fn last_successful_sync(&self, entity: &str) -> Option<DateTime<Utc>> {
        self.last_success.get(entity).map(|at| *at.value())
    }
}
