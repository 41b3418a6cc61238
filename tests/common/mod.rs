//! Shared fixtures for the integration suite.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sync_core::cache::FixedMemoryProbe;
use sync_core::orchestration::{ErrorKind, ProcessMode, ProcessOutcome};
use sync_core::registry::ItemError;
use sync_core::{
    Direction, EntityRegistry, EntitySyncService, Result, RunHandle, SyncCollaborators,
    SyncConfig, SyncError, SyncOrchestrator, TransferResult,
};

/// Scriptable entity adapter backed by a virtual item list
#[derive(Debug, Default)]
pub struct MockEntityService {
    /// Value reported by `count`
    counted: AtomicU64,
    /// Items that actually exist; may exceed `counted` to exercise continuation
    available: AtomicU64,
    transient_failures: AtomicU32,
    rejection: Mutex<Option<ErrorKind>>,
    fatal_offset: Mutex<Option<u64>>,
    skipped_per_batch: AtomicU64,
    errors_per_batch: AtomicU64,
    transfer_delay: Mutex<Option<Duration>>,
    offsets: Mutex<Vec<u64>>,
}

impl MockEntityService {
    pub fn with_items(total: u64) -> Self {
        let service = Self::default();
        service.counted.store(total, Ordering::SeqCst);
        service.available.store(total, Ordering::SeqCst);
        service
    }

    /// More items exist than `count` reports
    pub fn with_hidden_items(self, extra: u64) -> Self {
        self.available.fetch_add(extra, Ordering::SeqCst);
        self
    }

    pub fn failing_transiently(self, times: u32) -> Self {
        self.transient_failures.store(times, Ordering::SeqCst);
        self
    }

    /// Every transfer fails with a collaborator error of `kind`
    pub fn rejecting_with(self, kind: ErrorKind) -> Self {
        *self.rejection.lock() = Some(kind);
        self
    }

    /// Every item of the batch starting at `offset` fails
    pub fn failing_at_offset(self, offset: u64) -> Self {
        *self.fatal_offset.lock() = Some(offset);
        self
    }

    pub fn skipping(self, per_batch: u64) -> Self {
        self.skipped_per_batch.store(per_batch, Ordering::SeqCst);
        self
    }

    pub fn with_item_errors(self, per_batch: u64) -> Self {
        self.errors_per_batch.store(per_batch, Ordering::SeqCst);
        self
    }

    pub fn with_transfer_delay(self, delay: Duration) -> Self {
        *self.transfer_delay.lock() = Some(delay);
        self
    }

    pub fn heal(&self) {
        *self.fatal_offset.lock() = None;
        *self.rejection.lock() = None;
        self.transient_failures.store(0, Ordering::SeqCst);
    }

    /// Offsets requested by `transfer_batch`, in call order
    pub fn offsets(&self) -> Vec<u64> {
        self.offsets.lock().clone()
    }

    pub fn transfer_calls(&self) -> usize {
        self.offsets.lock().len()
    }
}

#[async_trait]
impl EntitySyncService for MockEntityService {
    async fn count(&self, _direction: Direction, _filters: &Value) -> Result<u64> {
        Ok(self.counted.load(Ordering::SeqCst))
    }

    async fn transfer_batch(
        &self,
        _direction: Direction,
        _filters: &Value,
        offset: u64,
        limit: usize,
    ) -> Result<TransferResult> {
        self.offsets.lock().push(offset);

        let delay = *self.transfer_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let rejection = *self.rejection.lock();
        if let Some(kind) = rejection {
            return Err(SyncError::collaborator(kind, "400 Bad Request"));
        }

        let remaining_failures = self.transient_failures.load(Ordering::SeqCst);
        if remaining_failures > 0 {
            self.transient_failures
                .store(remaining_failures - 1, Ordering::SeqCst);
            return Err(SyncError::collaborator(
                ErrorKind::Network,
                "connection reset by peer",
            ));
        }

        let available = self
            .available
            .load(Ordering::SeqCst)
            .saturating_sub(offset)
            .min(limit as u64);

        if *self.fatal_offset.lock() == Some(offset) {
            let errors = (0..available.max(1))
                .map(|i| {
                    ItemError::new(
                        Some(format!("SKU-{}", offset + i)),
                        "mapping_error",
                        "price is missing",
                    )
                })
                .collect();
            return Ok(TransferResult::default().with_errors(errors));
        }

        let skipped = self.skipped_per_batch.load(Ordering::SeqCst).min(available);
        let errors = self
            .errors_per_batch
            .load(Ordering::SeqCst)
            .min(available - skipped);
        let item_errors = (0..errors)
            .map(|i| {
                ItemError::new(
                    Some(format!("SKU-{}", offset + i)),
                    "remote_rejected",
                    "duplicate handle",
                )
            })
            .collect();

        Ok(TransferResult::processed(available - skipped - errors)
            .with_skipped(skipped)
            .with_errors(item_errors))
    }

    async fn pending_beyond(&self, _direction: Direction, _filters: &Value, offset: u64) -> Result<u64> {
        Ok(self.available.load(Ordering::SeqCst).saturating_sub(offset))
    }
}

/// Small, fast configuration: tiny retry delays, no throughput drift
pub fn test_config(batch_size: usize) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.batch.default_size = batch_size;
    config.batch.min_size = 1;
    config.batch.throughput_adjustment_enabled = false;
    config.lock.retry_delay_ms = 1;
    config.lock.acquire_retries = 2;
    config.retry.global_max_attempts = 2;
    config.retry.global_max_delay_seconds = 0.01;
    config.retry.jitter_max_seconds = 0.0;
    config.orchestrator.batches_per_invocation = 3;
    config.orchestrator.batch_interval_ms = 0;
    config
}

/// In-memory collaborators with memory usage pinned to half the limit
pub fn collaborators(config: &SyncConfig) -> SyncCollaborators {
    let probe = FixedMemoryProbe::new(config.cache.memory_limit_bytes / 2);
    SyncCollaborators::in_memory().with_memory_probe(Arc::new(probe))
}

pub fn orchestrator_with(
    registry: EntityRegistry,
    config: SyncConfig,
) -> (Arc<SyncOrchestrator>, SyncCollaborators) {
    let collaborators = collaborators(&config);
    let orchestrator = SyncOrchestrator::new(config, Arc::new(registry), collaborators.clone());
    (Arc::new(orchestrator), collaborators)
}

/// Drive a run with `Single` invocations until it is terminal or errors
pub async fn drive_to_end(
    orchestrator: &SyncOrchestrator,
    handle: &RunHandle,
) -> Result<(ProcessOutcome, usize)> {
    let mut invocations = 0;
    loop {
        invocations += 1;
        let outcome = orchestrator
            .process_next_batch(handle, ProcessMode::Single)
            .await?;
        if outcome.is_terminal() {
            return Ok((outcome, invocations));
        }
        assert!(invocations < 1_000, "run did not terminate");
    }
}
