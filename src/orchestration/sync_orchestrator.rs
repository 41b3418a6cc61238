//! # Sync Orchestrator
//!
//! Drives one sync run per entity from `start` to completion, failure or
//! cancellation across many short-lived invocations.
//!
//! ## Architecture
//!
//! The orchestrator is stateless between calls. The active run lives at
//! `sync:run:{entity}` in the injected [`KeyValueStore`] and every mutation is
//! a compare-and-swap on that value, so two invocations racing on the same run
//! can never both commit a batch:
//!
//! 1. **Claim**: the next batch is claimed by writing an in-flight marker. A
//!    fresh claim held by someone else makes the caller back off with `Busy`;
//!    a claim older than `in_flight_timeout_seconds` belonged to a crashed
//!    invocation and is taken over.
//! 2. **Transfer**: the registered [`EntitySyncService`](crate::registry::EntitySyncService)
//!    moves the batch, with transient failures retried by the [`RetryExecutor`].
//! 3. **Commit**: counters advance and the claim is cleared in one swap. The
//!    lock heartbeat and the recovery checkpoint are refreshed afterwards.
//!
//! A terminal transition archives the run into the bounded history at
//! `sync:history` and removes the active-run key.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let orchestrator = SyncOrchestrator::new(config, registry, SyncCollaborators::in_memory());
//! let handle = orchestrator.start("products", Direction::RemoteToLocal, json!({})).await?;
//!
//! while orchestrator
//!     .process_next_batch(&handle, ProcessMode::Slice)
//!     .await?
//!     .needs_more()
//! {}
//! ```

use super::batch_sizer::AdaptiveBatchSizer;
use super::dependency_scheduler::PersistedSuccess;
use super::distributed_lock::DistributedLock;
use super::retry_executor::{RetryExecutor, RetryOutcome};
use super::retry_policy::RetryPolicyResolver;
use super::types::{
    BatchClassification, ProcessMode, ProcessOutcome, ResumeRequest, StartRequest, SyncProgress,
};
use crate::cache::{CacheGrowthManager, MemoryProbe, SystemMemoryProbe};
use crate::config::SyncConfig;
use crate::constants::keys;
use crate::error::{Result, SyncError, SyncErrorContext};
use crate::logging::{log_error, log_sync_operation};
use crate::metrics::{InMemoryMetrics, MetricsSink};
use crate::models::{
    Direction, InFlightBatch, RunHandle, RunHistoryEntry, SyncErrorRecord, SyncRun,
};
use crate::registry::{EntityRegistration, EntityRegistry, TransferResult};
use crate::state_machine::{SyncEvent, SyncStateMachine, SyncStatus};
use crate::store::{
    load_json, save_json, EphemeralCache, ErrorLogStore, InMemoryEphemeralCache,
    InMemoryErrorLog, InMemoryKeyValueStore, InMemoryLockStore, KeyValueStore, LockStore,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const HISTORY_CAS_ATTEMPTS: u32 = 5;

/// External collaborators injected into the orchestrator
#[derive(Clone)]
pub struct SyncCollaborators {
    pub store: Arc<dyn KeyValueStore>,
    pub locks: Arc<dyn LockStore>,
    pub cache: Arc<dyn EphemeralCache>,
    pub error_log: Arc<dyn ErrorLogStore>,
    pub metrics: Arc<dyn MetricsSink>,
    pub memory_probe: Arc<dyn MemoryProbe>,
}

impl std::fmt::Debug for SyncCollaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCollaborators")
            .field("store", &self.store.provider_name())
            .finish()
    }
}

impl SyncCollaborators {
    /// Process-local backends with the system memory probe
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemoryKeyValueStore::new()),
            locks: Arc::new(InMemoryLockStore::new()),
            cache: Arc::new(InMemoryEphemeralCache::new()),
            error_log: Arc::new(InMemoryErrorLog::new()),
            metrics: Arc::new(InMemoryMetrics::default()),
            memory_probe: Arc::new(SystemMemoryProbe::new()),
        }
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = probe;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Outcome of a single claimed batch
enum BatchStep {
    Committed(SyncRun),
    Finished(ProcessOutcome),
    Busy,
}

pub struct SyncOrchestrator {
    config: SyncConfig,
    registry: Arc<EntityRegistry>,
    store: Arc<dyn KeyValueStore>,
    error_log: Arc<dyn ErrorLogStore>,
    metrics: Arc<dyn MetricsSink>,
    memory_probe: Arc<dyn MemoryProbe>,
    lock: DistributedLock,
    retry: RetryExecutor,
    batch_sizer: AdaptiveBatchSizer,
    cache: Arc<CacheGrowthManager>,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("entities", &self.registry.entities())
            .field("store", &self.store.provider_name())
            .finish()
    }
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        registry: Arc<EntityRegistry>,
        collaborators: SyncCollaborators,
    ) -> Self {
        let resolver = RetryPolicyResolver::new(config.retry.clone())
            .with_store(collaborators.store.clone());
        let batch_sizer = AdaptiveBatchSizer::new(
            config.batch.clone(),
            config.cache.memory_limit_bytes,
            collaborators.store.clone(),
        );
        let cache = CacheGrowthManager::new(
            config.cache.clone(),
            collaborators.cache.clone(),
            collaborators.memory_probe.clone(),
        );

        info!(
            entities = ?registry.entities(),
            store = collaborators.store.provider_name(),
            "🚀 Sync orchestrator initialized"
        );

        Self {
            lock: DistributedLock::new(collaborators.locks.clone(), config.lock.clone()),
            retry: RetryExecutor::new(Arc::new(resolver)),
            batch_sizer,
            cache: Arc::new(cache),
            registry,
            store: collaborators.store,
            error_log: collaborators.error_log,
            metrics: collaborators.metrics,
            memory_probe: collaborators.memory_probe,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    pub fn cache(&self) -> &Arc<CacheGrowthManager> {
        &self.cache
    }

    pub fn batch_sizer(&self) -> &AdaptiveBatchSizer {
        &self.batch_sizer
    }

    pub fn retry_resolver(&self) -> &Arc<RetryPolicyResolver> {
        self.retry.resolver()
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub async fn start(
        &self,
        entity: &str,
        direction: Direction,
        filters: Value,
    ) -> Result<RunHandle> {
        self.start_with(StartRequest::new(entity, direction).with_filters(filters))
            .await
    }

    /// Validate, lock, count and persist a new run
    ///
    /// Batches are not processed here unless
    /// `orchestrator.process_first_batch_on_start` is set.
    #[instrument(skip(self, request), fields(entity = %request.entity, direction = %request.direction))]
    pub async fn start_with(&self, request: StartRequest) -> Result<RunHandle> {
        let filters = normalize_filters(&request.entity, request.filters)?;
        let mut run = SyncRun::new(&request.entity, request.direction, filters);

        SyncStateMachine::transition(&mut run, SyncEvent::Validate)?;
        let registration = self.validate_request(&run).await?;

        self.clear_stale_run(&run.entity).await?;
        self.store.delete(&keys::cancel(&run.entity)).await?;

        SyncStateMachine::transition(&mut run, SyncEvent::AcquireLock)?;
        let metadata = json!({
            "direction": run.direction,
            "started_at": run.start_time,
            "filters": run.filters,
        });
        if !self
            .lock
            .acquire_default(&run.entity, &run.operation_id, metadata)
            .await?
        {
            return Err(self.concurrency_error(&run).await);
        }

        if let Err(error) = self.plan_run(&mut run, &registration, request.batch_size).await {
            self.abort_start(&mut run, &error).await;
            return Err(error);
        }

        let handle = run.handle();
        log_sync_operation(
            "start",
            &run.entity,
            Some(&run.operation_id),
            "running",
            Some(&format!(
                "total_items={} total_batches={} batch_size={}",
                run.total_items, run.total_batches, run.batch_size
            )),
        );

        if self.config.orchestrator.process_first_batch_on_start {
            self.process_next_batch(&handle, ProcessMode::Single).await?;
        }

        Ok(handle)
    }

    async fn plan_run(
        &self,
        run: &mut SyncRun,
        registration: &EntityRegistration,
        requested_batch_size: Option<usize>,
    ) -> Result<()> {
        SyncStateMachine::transition(run, SyncEvent::Count)?;
        let total_items = self.count_items(registration, run).await?;

        let respect_user_limit = requested_batch_size.is_some();
        let base = self
            .batch_sizer
            .resolve_for(&run.entity, None, requested_batch_size)
            .await?;
        let base = self
            .batch_sizer
            .throughput_adjusted(&run.entity, base, respect_user_limit);
        let batch_size = self.batch_sizer.memory_optimized(
            &run.entity,
            base,
            self.memory_probe.as_ref(),
            respect_user_limit,
        );

        run.plan(total_items, batch_size);
        SyncStateMachine::transition(run, SyncEvent::Begin)?;
        run.version = 1;

        save_json(self.store.as_ref(), &keys::run(&run.entity), &*run).await?;
        self.save_checkpoint(run).await?;
        self.metrics
            .start_operation(&run.operation_id, &run.entity, run.direction)
            .await;
        self.cache.begin_run(&run.entity);

        info!(
            operation_id = %run.operation_id,
            total_items = run.total_items,
            total_batches = run.total_batches,
            batch_size = run.batch_size,
            "✅ Sync run planned"
        );
        Ok(())
    }

    async fn abort_start(&self, run: &mut SyncRun, error: &SyncError) {
        if let Err(transition_error) =
            SyncStateMachine::transition(run, SyncEvent::fail_with_error(error.to_string()))
        {
            warn!(error = %transition_error, "Could not mark aborted start as failed");
        }
        if let Err(release_error) = self.lock.release_if_held(&run.entity, &run.operation_id).await
        {
            warn!(error = %release_error, "Failed to release lock after aborted start");
        }
        if let Err(history_error) = self
            .record_history(RunHistoryEntry::from_run(run, Some(error.to_string())))
            .await
        {
            warn!(error = %history_error, "Failed to record aborted start");
        }
        log_error(
            "orchestrator",
            "start",
            &error.to_string(),
            Some(&run.entity),
        );
    }

    /// Process the next batch (`Single`) or a slice of batches (`Slice`)
    #[instrument(skip(self, handle), fields(entity = %handle.entity, operation_id = %handle.operation_id))]
    pub async fn process_next_batch(
        &self,
        handle: &RunHandle,
        mode: ProcessMode,
    ) -> Result<ProcessOutcome> {
        let budget = match mode {
            ProcessMode::Single => 1,
            ProcessMode::Slice => self.config.orchestrator.batches_per_invocation.max(1),
        };

        let mut committed = 0u32;
        let mut last = ProcessOutcome::Busy;
        for _ in 0..budget {
            match self.process_one(handle).await? {
                BatchStep::Committed(run) => {
                    committed += 1;
                    last = ProcessOutcome::Progress {
                        batches: committed,
                        current_batch: run.current_batch,
                        total_batches: run.total_batches,
                        items_synced: run.items_synced,
                        progress_percentage: run.progress_percentage(),
                    };
                }
                BatchStep::Finished(outcome) => return Ok(outcome),
                BatchStep::Busy => return Ok(last),
            }
        }
        Ok(last)
    }

    async fn process_one(&self, handle: &RunHandle) -> Result<BatchStep> {
        let entity = handle.entity.as_str();
        let Some((mut run, raw)) = self.load_run(entity).await? else {
            if self.cancel_requested(entity).await? {
                return Ok(BatchStep::Finished(ProcessOutcome::Cancelled));
            }
            return Err(SyncError::NotFound(format!("no active sync run for {entity}")));
        };

        if run.operation_id != handle.operation_id {
            return Err(SyncError::NotFound(format!(
                "run {} for {entity} was superseded by {}",
                handle.operation_id, run.operation_id
            )));
        }
        if !run.in_progress() {
            debug!(status = %run.status, "Run is finalizing elsewhere");
            return Ok(BatchStep::Busy);
        }

        if self.cancel_requested(entity).await? {
            self.finish_cancelled(run).await?;
            return Ok(BatchStep::Finished(ProcessOutcome::Cancelled));
        }

        let now = Utc::now();
        if let Some(claim) = &run.in_flight {
            if now - claim.claimed_at < self.config.orchestrator.in_flight_timeout() {
                debug!(batch = claim.batch_index, "Batch already claimed");
                return Ok(BatchStep::Busy);
            }
            warn!(
                batch = claim.batch_index,
                claim_id = %claim.claim_id,
                claimed_at = %claim.claimed_at,
                "Reclaiming batch from a crashed invocation"
            );
        }
        run.in_flight = Some(InFlightBatch {
            batch_index: run.current_batch,
            claim_id: Uuid::new_v4().to_string(),
            claimed_at: now,
        });
        let Some(claimed_raw) = self.commit(&raw, &mut run).await? else {
            debug!("Lost batch claim race");
            return Ok(BatchStep::Busy);
        };

        let Some(registration) = self.registry.get(entity) else {
            let error = SyncError::validation(
                format!("entity {entity} is no longer registered"),
                context_for(&run),
            );
            self.fail_run(run, &error).await?;
            return Err(error);
        };

        match self.cache.check_memory().await {
            Ok(report) => debug!(status = ?report.status, usage_percent = report.usage_percent, "Memory check"),
            Err(error @ SyncError::Memory { .. }) => {
                self.fail_run(run, &error).await?;
                return Err(error);
            }
            Err(error) => {
                self.release_claim(run, &claimed_raw).await?;
                return Err(error);
            }
        }

        if run.is_complete() && !self.extend_for_continuation(&registration, &mut run).await {
            let outcome = self.complete_run(run, &claimed_raw).await?;
            return Ok(BatchStep::Finished(outcome));
        }

        self.transfer_and_commit(run, claimed_raw, &registration).await
    }

    async fn transfer_and_commit(
        &self,
        run: SyncRun,
        claimed_raw: Value,
        registration: &EntityRegistration,
    ) -> Result<BatchStep> {
        let plan = run.next_plan();
        let started = Instant::now();
        let service = registration.service.clone();
        let filters = run.filters.clone();
        let direction = run.direction;
        let context = context_for(&run);
        let claim = Mutex::new((run, claimed_raw));
        let claim_lost = AtomicBool::new(false);
        let (claim_ref, lost_ref) = (&claim, &claim_lost);

        let outcome = self
            .retry
            .execute_as("transfer_batch", registration.operation_kind, move |attempt| {
                let service = service.clone();
                let filters = filters.clone();
                let context = context.clone();
                async move {
                    // Backoff may have outlived the claim timeout
                    if attempt > 0 && !self.refresh_claim(claim_ref).await? {
                        lost_ref.store(true, Ordering::SeqCst);
                        return Err(SyncError::Concurrency {
                            message: format!(
                                "batch {} was reclaimed during retry backoff",
                                plan.batch_index
                            ),
                            context,
                        });
                    }
                    service
                        .transfer_batch(direction, &filters, plan.offset, plan.limit)
                        .await
                }
            })
            .await;
        let (mut run, claimed_raw) = claim.into_inner();

        if claim_lost.load(Ordering::SeqCst) {
            warn!(batch = plan.batch_index, "Batch claim lost while retrying - backing off");
            return Ok(BatchStep::Busy);
        }

        let result = match outcome {
            RetryOutcome::Ok(result) => result,
            RetryOutcome::Retryable { error, attempts } => {
                warn!(
                    batch = plan.batch_index,
                    attempts,
                    error = %error,
                    "Batch transfer exhausted retries - run stays resumable"
                );
                self.metrics
                    .record_error(&run.operation_id, error.code(), &error.to_string())
                    .await;
                self.release_claim(run, &claimed_raw).await?;
                return Err(error);
            }
            RetryOutcome::Fatal(error) => {
                let fatal = SyncError::FatalBatch {
                    batch_index: plan.batch_index,
                    message: error.to_string(),
                    context: context_for(&run),
                };
                self.fail_run(run, &fatal).await?;
                return Err(fatal);
            }
        };

        self.log_item_errors(&run, &result).await?;

        if BatchClassification::classify(&result).is_fatal() {
            let fatal = SyncError::FatalBatch {
                batch_index: plan.batch_index,
                message: format!("all {} items in the batch failed", result.errors),
                context: context_for(&run),
            };
            run.errors += result.errors;
            self.metrics
                .record_items(&run.operation_id, 0, result.skipped, result.errors)
                .await;
            self.fail_run(run, &fatal).await?;
            return Err(fatal);
        }

        run.advance(result.processed, result.skipped, result.errors, plan.limit);
        run.in_flight = None;
        SyncStateMachine::transition(&mut run, SyncEvent::BatchCommitted)?;
        let Some(committed_raw) = self.commit(&claimed_raw, &mut run).await? else {
            warn!(batch = plan.batch_index, "Batch commit lost to a concurrent invocation");
            return Ok(BatchStep::Busy);
        };

        self.metrics
            .record_items(
                &run.operation_id,
                result.processed,
                result.skipped,
                result.errors,
            )
            .await;
        self.batch_sizer
            .record_throughput(&run.entity, plan.limit, result.processed, started.elapsed());
        self.save_checkpoint(&run).await?;
        self.renew_lock(&run).await?;

        debug!(
            batch = plan.batch_index,
            processed = result.processed,
            skipped = result.skipped,
            errors = result.errors,
            items_synced = run.items_synced,
            "📦 Batch committed"
        );

        if run.is_complete() {
            if !self.extend_for_continuation(registration, &mut run).await {
                let outcome = self.complete_run(run, &committed_raw).await?;
                return Ok(BatchStep::Finished(outcome));
            }
            if self.commit(&committed_raw, &mut run).await?.is_none() {
                return Ok(BatchStep::Busy);
            }
        }

        Ok(BatchStep::Committed(run))
    }

    /// Probe for items beyond the initial count once the counted batches are used up
    async fn extend_for_continuation(
        &self,
        registration: &EntityRegistration,
        run: &mut SyncRun,
    ) -> bool {
        if !registration.supports_continuation || !run.batches_exhausted() {
            return false;
        }

        match registration
            .service
            .pending_beyond(run.direction, &run.filters, run.next_offset)
            .await
        {
            Ok(0) => false,
            Ok(pending) => {
                // Counted total may already be below what was transferred
                run.total_batches += 1;
                run.total_items =
                    run.items_synced.max(run.total_items) + pending.min(run.batch_size as u64);
                info!(
                    pending,
                    total_batches = run.total_batches,
                    total_items = run.total_items,
                    "➕ Continuation found more items"
                );
                true
            }
            Err(error) => {
                warn!(error = %error, "Continuation probe failed - completing with counted items");
                false
            }
        }
    }

    async fn complete_run(&self, mut run: SyncRun, expected: &Value) -> Result<ProcessOutcome> {
        if run.completion_conditions_disagree() {
            warn!(
                current_batch = run.current_batch,
                total_batches = run.total_batches,
                items_synced = run.items_synced,
                total_items = run.total_items,
                "Completion conditions disagree"
            );
        }

        SyncStateMachine::transition(&mut run, SyncEvent::Complete)?;
        run.in_flight = None;
        if self.commit(expected, &mut run).await?.is_none() {
            return Ok(ProcessOutcome::Busy);
        }
        SyncStateMachine::transition(&mut run, SyncEvent::Finalize)?;

        self.archive(&run, None).await?;
        self.store.delete(&keys::recovery(&run.entity)).await?;
        save_json(
            self.store.as_ref(),
            &keys::last_success(&run.entity),
            &PersistedSuccess {
                operation_id: run.operation_id.clone(),
                finished_at: Utc::now(),
            },
        )
        .await?;
        self.lock
            .release_if_held(&run.entity, &run.operation_id)
            .await?;
        self.metrics
            .end_operation(&run.operation_id, SyncStatus::Completed)
            .await;
        self.cache.end_run(&run.entity).await?;

        log_sync_operation(
            "complete",
            &run.entity,
            Some(&run.operation_id),
            "completed",
            Some(&format!(
                "items_synced={} skipped={} errors={}",
                run.items_synced, run.items_skipped, run.errors
            )),
        );

        Ok(ProcessOutcome::Completed {
            items_synced: run.items_synced,
            total_items: run.total_items,
            errors: run.errors,
        })
    }

    /// Abort the run; the recovery checkpoint is kept for `resume`
    async fn fail_run(&self, mut run: SyncRun, error: &SyncError) -> Result<()> {
        let message = error.to_string();
        if let Err(transition_error) =
            SyncStateMachine::transition(&mut run, SyncEvent::fail_with_error(&message))
        {
            warn!(error = %transition_error, "Forcing failed status");
            run.status = SyncStatus::Failed;
            run.failure_reason = Some(message.clone());
        }
        run.in_flight = None;

        self.archive(&run, Some(message.clone())).await?;
        self.lock
            .release_if_held(&run.entity, &run.operation_id)
            .await?;
        self.metrics
            .record_error(&run.operation_id, error.code(), &message)
            .await;
        self.metrics
            .end_operation(&run.operation_id, SyncStatus::Failed)
            .await;
        self.cache.end_run(&run.entity).await?;

        log_error("orchestrator", "process_next_batch", &message, Some(&run.entity));
        Ok(())
    }

    async fn finish_cancelled(&self, mut run: SyncRun) -> Result<RunHistoryEntry> {
        SyncStateMachine::transition(&mut run, SyncEvent::Cancel)?;
        run.in_flight = None;

        let entry = self.archive(&run, Some("cancelled".to_string())).await?;
        self.store.delete(&keys::recovery(&run.entity)).await?;
        self.lock.release(&run.entity).await?;
        self.metrics
            .end_operation(&run.operation_id, SyncStatus::Cancelled)
            .await;
        self.cache.end_run(&run.entity).await?;

        log_sync_operation(
            "cancel",
            &run.entity,
            Some(&run.operation_id),
            "cancelled",
            None,
        );
        Ok(entry)
    }

    async fn release_claim(&self, mut run: SyncRun, expected: &Value) -> Result<()> {
        run.in_flight = None;
        if self.commit(expected, &mut run).await?.is_none() {
            debug!("Claim already replaced");
        }
        Ok(())
    }

    /// Re-stamp our in-flight claim; false once another invocation replaced it
    async fn refresh_claim(&self, claim: &Mutex<(SyncRun, Value)>) -> Result<bool> {
        let (mut run, raw) = claim.lock().clone();
        let now = Utc::now();
        if let Some(in_flight) = run.in_flight.as_mut() {
            in_flight.claimed_at = now;
        }
        run.last_update = now;
        match self.commit(&raw, &mut run).await? {
            Some(updated) => {
                *claim.lock() = (run, updated);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stop the active run for `entity`
    ///
    /// Sets the cancellation flag polled by in-flight invocations, clears the
    /// recovery checkpoint and releases the lock.
    #[instrument(skip(self))]
    pub async fn cancel(&self, entity: &str) -> Result<RunHistoryEntry> {
        let run = match self.load_run(entity).await? {
            Some((run, _)) if run.in_progress() => run,
            _ => {
                return Err(SyncError::NotFound(format!(
                    "no active sync run to cancel for {entity}"
                )))
            }
        };

        self.store
            .set(
                &keys::cancel(entity),
                json!({
                    "operation_id": run.operation_id,
                    "requested_at": Utc::now(),
                }),
            )
            .await?;
        self.finish_cancelled(run).await
    }

    /// Re-enter `running` from the recovery checkpoint or an explicit offset
    #[instrument(skip(self, request), fields(entity = ?request.entity))]
    pub async fn resume(&self, request: ResumeRequest) -> Result<RunHandle> {
        let entity = match request.entity.clone() {
            Some(entity) => entity,
            None => load_json::<String>(self.store.as_ref(), keys::RECOVERY_LAST)
                .await?
                .ok_or_else(|| SyncError::NotFound("no recovery checkpoint".to_string()))?,
        };

        if let Some((active, _)) = self.load_run(&entity).await? {
            let threshold = self.config.orchestrator.stale_run_threshold();
            if active.in_progress() && !active.is_stale(threshold, Utc::now()) {
                return Err(SyncError::Concurrency {
                    message: format!("sync already running for {entity}"),
                    context: context_for(&active),
                });
            }
            self.clear_stale_run(&entity).await?;
        }

        let checkpoint: Option<SyncRun> =
            load_json(self.store.as_ref(), &keys::recovery(&entity)).await?;
        let mut run = match checkpoint {
            Some(run) => run,
            None => self.run_from_offset(&entity, &request).await?,
        };

        let registration = self.validate_request(&run).await?;
        self.store.delete(&keys::cancel(&entity)).await?;

        let metadata = json!({ "direction": run.direction, "resumed_at": Utc::now() });
        if !self
            .lock
            .acquire_default(&entity, &run.operation_id, metadata)
            .await?
        {
            return Err(self.concurrency_error(&run).await);
        }

        if let Err(error) = self.rehydrate(&mut run, &registration, &request).await {
            if let Err(release_error) = self.lock.release_if_held(&entity, &run.operation_id).await
            {
                warn!(error = %release_error, "Failed to release lock after aborted resume");
            }
            return Err(error);
        }

        log_sync_operation(
            "resume",
            &entity,
            Some(&run.operation_id),
            "running",
            Some(&format!(
                "offset={} current_batch={} total_batches={}",
                run.next_offset, run.current_batch, run.total_batches
            )),
        );
        Ok(run.handle())
    }

    async fn run_from_offset(&self, entity: &str, request: &ResumeRequest) -> Result<SyncRun> {
        let context = SyncErrorContext::for_entity(entity);
        if request.offset.is_none() {
            return Err(SyncError::NotFound(format!(
                "no recovery checkpoint for {entity}"
            )));
        }
        let direction = request.direction.ok_or_else(|| {
            SyncError::validation(
                "direction is required to resume without a checkpoint",
                context.clone(),
            )
        })?;
        let filters = normalize_filters(entity, request.filters.clone().unwrap_or(Value::Null))?;
        let registration = self.registry.get(entity).ok_or_else(|| {
            SyncError::validation(format!("unknown entity: {entity}"), context.clone())
        })?;

        let mut run = SyncRun::new(entity, direction, filters);
        let total_items = self.count_items(&registration, &run).await?;
        let batch_size = self
            .batch_sizer
            .resolve_for(entity, None, request.batch_size)
            .await?;
        run.plan(total_items, batch_size);
        Ok(run)
    }

    async fn rehydrate(
        &self,
        run: &mut SyncRun,
        registration: &EntityRegistration,
        request: &ResumeRequest,
    ) -> Result<()> {
        let bounds = self.batch_sizer.config().bounds_for(&run.entity);
        if let Some(size) = request.batch_size {
            run.batch_size = bounds.clamp(size);
        }
        if run.batch_size == 0 {
            run.batch_size = bounds.default_size;
        }
        if let Some(offset) = request.offset {
            run.next_offset = offset;
            run.items_synced = offset.min(run.total_items);
        }
        if request.offset.is_some() || request.batch_size.is_some() {
            let batch_size = run.batch_size as u64;
            run.current_batch = run.next_offset / batch_size;
            run.total_batches = run.current_batch
                + run.total_items.saturating_sub(run.next_offset).div_ceil(batch_size);
        }

        run.in_flight = None;
        SyncStateMachine::transition(run, SyncEvent::Resume)?;
        run.version += 1;

        save_json(self.store.as_ref(), &keys::run(&run.entity), &*run).await?;
        self.save_checkpoint(run).await?;
        self.metrics
            .start_operation(&run.operation_id, &run.entity, run.direction)
            .await;
        self.cache.begin_run(&run.entity);

        debug!(
            supports_continuation = registration.supports_continuation,
            batch_size = run.batch_size,
            "Run rehydrated"
        );
        Ok(())
    }

    /// Progress snapshot of the active run
    pub async fn status(&self, entity: &str) -> Result<Option<SyncProgress>> {
        let Some((run, _)) = self.load_run(entity).await? else {
            return Ok(None);
        };
        let lock = self.lock.lock_info(entity).await?;
        let threshold = self.config.orchestrator.stale_run_threshold();

        Ok(Some(SyncProgress {
            progress_percentage: run.progress_percentage(),
            is_stale: run.in_progress() && run.is_stale(threshold, Utc::now()),
            batch_in_flight: run.in_flight.is_some(),
            operation_id: run.operation_id,
            entity: run.entity,
            direction: run.direction,
            status: run.status,
            batch_size: run.batch_size,
            current_batch: run.current_batch,
            total_batches: run.total_batches,
            items_synced: run.items_synced,
            items_skipped: run.items_skipped,
            total_items: run.total_items,
            errors: run.errors,
            start_time: run.start_time,
            last_update: run.last_update,
            lock,
        }))
    }

    /// Archived runs, newest first
    pub async fn history(&self, limit: usize) -> Result<Vec<RunHistoryEntry>> {
        let mut history: Vec<RunHistoryEntry> = load_json(self.store.as_ref(), keys::HISTORY)
            .await?
            .unwrap_or_default();
        history.truncate(limit);
        Ok(history)
    }

    pub async fn errors_for(&self, operation_id: &str) -> Result<Vec<SyncErrorRecord>> {
        Ok(self.error_log.for_run(operation_id).await?)
    }

    async fn validate_request(&self, run: &SyncRun) -> Result<EntityRegistration> {
        let context = context_for(run);
        if run.entity.trim().is_empty() {
            return Err(SyncError::validation("entity must not be empty", context));
        }
        let registration = self.registry.get(&run.entity).ok_or_else(|| {
            SyncError::validation(format!("unknown entity: {}", run.entity), context.clone())
        })?;
        if !registration.directions.contains(&run.direction) {
            return Err(SyncError::validation(
                format!("{} does not support {} sync", run.entity, run.direction),
                context,
            ));
        }
        registration
            .service
            .validate(run.direction, &run.filters)
            .await?;
        Ok(registration)
    }

    async fn count_items(&self, registration: &EntityRegistration, run: &SyncRun) -> Result<u64> {
        let service = registration.service.clone();
        let filters = run.filters.clone();
        let direction = run.direction;
        self.retry
            .execute_as("count", registration.operation_kind, |_attempt| {
                let service = service.clone();
                let filters = filters.clone();
                async move { service.count(direction, &filters).await }
            })
            .await
            .into_result()
    }

    /// Force-clear a run whose progress heartbeat is older than the stale threshold
    async fn clear_stale_run(&self, entity: &str) -> Result<()> {
        let Some((mut existing, _)) = self.load_run(entity).await? else {
            return Ok(());
        };
        let threshold = self.config.orchestrator.stale_run_threshold();
        if !existing.status.is_terminal() && !existing.is_stale(threshold, Utc::now()) {
            return Ok(());
        }

        let message = format!(
            "stale run force-cleared (last update {})",
            existing.last_update.to_rfc3339()
        );
        warn!(
            entity = %entity,
            operation_id = %existing.operation_id,
            last_update = %existing.last_update,
            "🧹 Force-clearing stale sync run"
        );
        if !existing.status.is_terminal() {
            if let Err(error) =
                SyncStateMachine::transition(&mut existing, SyncEvent::fail_with_error(&message))
            {
                warn!(error = %error, "Stale run could not transition to failed");
            }
        }

        self.archive(&existing, Some(message)).await?;
        self.lock
            .release_if_held(entity, &existing.operation_id)
            .await?;
        self.metrics
            .end_operation(&existing.operation_id, SyncStatus::Failed)
            .await;
        self.cache.end_run(entity).await?;
        Ok(())
    }

    async fn concurrency_error(&self, run: &SyncRun) -> SyncError {
        let mut context = context_for(run);
        context.lock_holder = match self.lock.lock_info(&run.entity).await {
            Ok(holder) => holder,
            Err(error) => {
                warn!(error = %error, "Could not read lock holder");
                None
            }
        };
        let holder = context
            .lock_holder
            .as_ref()
            .map_or("unknown", |r| r.holder_operation_id.as_str())
            .to_string();
        SyncError::Concurrency {
            message: format!("{} is locked by operation {holder}", run.entity),
            context,
        }
    }

    async fn renew_lock(&self, run: &SyncRun) -> Result<()> {
        if self.lock.heartbeat(&run.entity, &run.operation_id).await? {
            return Ok(());
        }
        let metadata = json!({ "direction": run.direction, "reacquired_at": Utc::now() });
        if self
            .lock
            .acquire(&run.entity, &run.operation_id, self.config.lock.ttl_seconds, 1, metadata)
            .await?
        {
            warn!("Lock was lost and has been re-acquired");
            return Ok(());
        }
        Err(self.concurrency_error(run).await)
    }

    async fn log_item_errors(&self, run: &SyncRun, result: &TransferResult) -> Result<()> {
        for item in &result.item_errors {
            self.error_log
                .append(SyncErrorRecord::new(
                    &run.operation_id,
                    &run.entity,
                    item.identifier.clone(),
                    &item.code,
                    &item.message,
                ))
                .await?;
        }
        Ok(())
    }

    async fn load_run(&self, entity: &str) -> Result<Option<(SyncRun, Value)>> {
        match self.store.get(&keys::run(entity)).await? {
            Some(raw) => {
                let run: SyncRun = serde_json::from_value(raw.clone())?;
                Ok(Some((run, raw)))
            }
            None => Ok(None),
        }
    }

    /// Compare-and-swap the run; returns the stored value on success
    async fn commit(&self, expected: &Value, run: &mut SyncRun) -> Result<Option<Value>> {
        run.version += 1;
        let updated = serde_json::to_value(&*run)?;
        let swapped = self
            .store
            .compare_and_swap(&keys::run(&run.entity), Some(expected), updated.clone())
            .await?;
        Ok(swapped.then_some(updated))
    }

    async fn save_checkpoint(&self, run: &SyncRun) -> Result<()> {
        save_json(self.store.as_ref(), &keys::recovery(&run.entity), run).await?;
        save_json(self.store.as_ref(), keys::RECOVERY_LAST, &run.entity).await?;
        Ok(())
    }

    async fn cancel_requested(&self, entity: &str) -> Result<bool> {
        Ok(self.store.get(&keys::cancel(entity)).await?.is_some())
    }

    /// Record a terminal run in the history and drop the active-run key
    async fn archive(&self, run: &SyncRun, message: Option<String>) -> Result<RunHistoryEntry> {
        let entry = RunHistoryEntry::from_run(run, message.or_else(|| run.failure_reason.clone()));
        self.record_history(entry.clone()).await?;
        self.store.delete(&keys::run(&run.entity)).await?;
        Ok(entry)
    }

    async fn record_history(&self, entry: RunHistoryEntry) -> Result<()> {
        let limit = self.config.orchestrator.history_limit.max(1);
        for _ in 0..HISTORY_CAS_ATTEMPTS {
            let current = self.store.get(keys::HISTORY).await?;
            let mut history: Vec<RunHistoryEntry> = match &current {
                Some(value) => serde_json::from_value(value.clone())?,
                None => Vec::new(),
            };
            history.insert(0, entry.clone());
            history.truncate(limit);

            if self
                .store
                .compare_and_swap(keys::HISTORY, current.as_ref(), serde_json::to_value(&history)?)
                .await?
            {
                return Ok(());
            }
        }
        warn!(operation_id = %entry.operation_id, "History append contended - entry dropped");
        Ok(())
    }
}

fn context_for(run: &SyncRun) -> SyncErrorContext {
    SyncErrorContext::for_entity(&run.entity)
        .with_direction(run.direction)
        .with_operation(&run.operation_id)
}

fn normalize_filters(entity: &str, filters: Value) -> Result<Value> {
    match filters {
        Value::Null => Ok(Value::Object(Default::default())),
        Value::Object(_) => Ok(filters),
        other => Err(SyncError::validation(
            format!("filters must be a JSON object, got {other}"),
            SyncErrorContext::for_entity(entity),
        )),
    }
}
