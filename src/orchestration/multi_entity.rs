//! # Multi-Entity Coordinator
//!
//! Runs a set of entities in dependency order, each to completion, within a
//! single driver.
//!
//! ## Semantics
//!
//! - The requested set is topologically sorted first; a cycle aborts before any
//!   run starts.
//! - An entity starts only once its prerequisites have a successful sync on
//!   record. A failed, cancelled or blocked entity blocks every dependent,
//!   which is reported as `blocked` without being started.
//! - Each entity is driven with `Slice` invocations; `Busy` answers back off
//!   briefly and are retried a bounded number of times.

use super::dependency_scheduler::DependencyScheduler;
use super::sync_orchestrator::SyncOrchestrator;
use super::types::{ProcessMode, ProcessOutcome, StartRequest};
use crate::error::Result;
use crate::models::Direction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

const DEFAULT_BUSY_BACKOFF: Duration = Duration::from_millis(100);
const DEFAULT_MAX_BUSY_RETRIES: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRunStatus {
    Completed,
    Failed,
    Cancelled,
    /// Not started because a prerequisite did not complete
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRunReport {
    pub entity: String,
    pub status: EntityRunStatus,
    pub operation_id: Option<String>,
    pub items_synced: u64,
    pub total_items: u64,
    pub errors: u64,
    pub message: Option<String>,
}

impl EntityRunReport {
    fn blocked(entity: &str, message: String) -> Self {
        Self {
            entity: entity.to_string(),
            status: EntityRunStatus::Blocked,
            operation_id: None,
            items_synced: 0,
            total_items: 0,
            errors: 0,
            message: Some(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiEntityReport {
    /// Execution order after the topological sort
    pub order: Vec<String>,
    pub entities: Vec<EntityRunReport>,
}

impl MultiEntityReport {
    pub fn get(&self, entity: &str) -> Option<&EntityRunReport> {
        self.entities.iter().find(|r| r.entity == entity)
    }

    pub fn all_completed(&self) -> bool {
        self.entities
            .iter()
            .all(|r| r.status == EntityRunStatus::Completed)
    }

    pub fn count(&self, status: EntityRunStatus) -> usize {
        self.entities.iter().filter(|r| r.status == status).count()
    }
}

pub struct MultiEntityCoordinator {
    orchestrator: Arc<SyncOrchestrator>,
    scheduler: DependencyScheduler,
    busy_backoff: Duration,
    max_busy_retries: u32,
}

impl std::fmt::Debug for MultiEntityCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiEntityCoordinator")
            .field("scheduler", &self.scheduler)
            .field("busy_backoff", &self.busy_backoff)
            .finish()
    }
}

impl MultiEntityCoordinator {
    /// Coordinator using the orchestrator's dependency graph, metrics sink and store
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        let scheduler = DependencyScheduler::from_config(
            &orchestrator.config().dependencies,
            orchestrator.metrics().clone(),
        )
        .with_store(orchestrator.store().clone());
        Self::with_scheduler(orchestrator, scheduler)
    }

    pub fn with_scheduler(orchestrator: Arc<SyncOrchestrator>, scheduler: DependencyScheduler) -> Self {
        Self {
            orchestrator,
            scheduler,
            busy_backoff: DEFAULT_BUSY_BACKOFF,
            max_busy_retries: DEFAULT_MAX_BUSY_RETRIES,
        }
    }

    pub fn with_busy_backoff(mut self, backoff: Duration, max_retries: u32) -> Self {
        self.busy_backoff = backoff;
        self.max_busy_retries = max_retries;
        self
    }

    pub fn scheduler(&self) -> &DependencyScheduler {
        &self.scheduler
    }

    /// Sync every requested entity in dependency order
    #[instrument(skip(self, entities, filters), fields(direction = %direction))]
    pub async fn run<S: AsRef<str>>(
        &self,
        entities: &[S],
        direction: Direction,
        filters: Value,
    ) -> Result<MultiEntityReport> {
        let order = self.scheduler.topo_sort(entities)?;
        info!(order = ?order, "🗺️ Multi-entity sync order resolved");

        let mut unsuccessful: HashSet<String> = HashSet::new();
        let mut reports = Vec::with_capacity(order.len());

        for entity in &order {
            let report = self
                .run_entity(entity, direction, filters.clone(), &unsuccessful)
                .await;
            if report.status != EntityRunStatus::Completed {
                unsuccessful.insert(entity.clone());
            }
            reports.push(report);
        }

        let report = MultiEntityReport {
            order,
            entities: reports,
        };
        info!(
            completed = report.count(EntityRunStatus::Completed),
            failed = report.count(EntityRunStatus::Failed),
            blocked = report.count(EntityRunStatus::Blocked),
            "Multi-entity sync finished"
        );
        Ok(report)
    }

    async fn run_entity(
        &self,
        entity: &str,
        direction: Direction,
        filters: Value,
        unsuccessful: &HashSet<String>,
    ) -> EntityRunReport {
        let failed_prerequisites: Vec<&String> = self
            .scheduler
            .graph()
            .prerequisites(entity)
            .iter()
            .filter(|p| unsuccessful.contains(*p))
            .collect();
        if !failed_prerequisites.is_empty() {
            warn!(entity = %entity, prerequisites = ?failed_prerequisites, "Entity blocked");
            return EntityRunReport::blocked(
                entity,
                format!("prerequisites did not complete: {failed_prerequisites:?}"),
            );
        }

        let check = self.scheduler.validate_dependencies(entity, false).await;
        if !check.ok {
            return EntityRunReport::blocked(
                entity,
                format!("prerequisites never synced: {:?}", check.missing),
            );
        }

        let request = StartRequest::new(entity, direction).with_filters(filters);
        let handle = match self.orchestrator.start_with(request).await {
            Ok(handle) => handle,
            Err(error) => {
                return EntityRunReport {
                    entity: entity.to_string(),
                    status: EntityRunStatus::Failed,
                    operation_id: None,
                    items_synced: 0,
                    total_items: 0,
                    errors: 0,
                    message: Some(error.to_string()),
                }
            }
        };

        let mut report = EntityRunReport {
            entity: entity.to_string(),
            status: EntityRunStatus::Failed,
            operation_id: Some(handle.operation_id.clone()),
            items_synced: 0,
            total_items: 0,
            errors: 0,
            message: None,
        };

        let mut busy_retries = 0;
        loop {
            match self
                .orchestrator
                .process_next_batch(&handle, ProcessMode::Slice)
                .await
            {
                Ok(ProcessOutcome::Progress { items_synced, .. }) => {
                    report.items_synced = items_synced;
                    busy_retries = 0;
                }
                Ok(ProcessOutcome::Busy) => {
                    busy_retries += 1;
                    if busy_retries > self.max_busy_retries {
                        report.message = Some("run stayed busy".to_string());
                        return report;
                    }
                    tokio::time::sleep(self.busy_backoff).await;
                }
                Ok(ProcessOutcome::Completed {
                    items_synced,
                    total_items,
                    errors,
                }) => {
                    report.status = EntityRunStatus::Completed;
                    report.items_synced = items_synced;
                    report.total_items = total_items;
                    report.errors = errors;
                    return report;
                }
                Ok(ProcessOutcome::Cancelled) => {
                    report.status = EntityRunStatus::Cancelled;
                    return report;
                }
                Err(error) => {
                    warn!(entity = %entity, error = %error, "Entity sync failed");
                    report.message = Some(error.to_string());
                    return report;
                }
            }
        }
    }
}
