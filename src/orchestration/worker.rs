//! # Sync Worker
//!
//! Channel-fed driver for sync runs.
//!
//! ## Overview
//!
//! The worker owns no run state. It consumes [`SyncCommand`]s from an mpsc
//! channel and forwards them to the [`SyncOrchestrator`]. After a batch
//! invocation that left work behind, the follow-up `ProcessNext` is handed to
//! a [`BatchScheduler`]; the default [`ChannelScheduler`] sends it back into
//! the worker's own channel after `orchestrator.batch_interval_ms`.
//!
//! The scheduler only holds a weak sender, so dropping every external sender
//! stops the worker once pending follow-ups have drained.

use super::sync_orchestrator::SyncOrchestrator;
use super::types::{ProcessMode, ProcessOutcome, StartRequest};
use crate::error::{Result, SyncError};
use crate::models::{RunHandle, RunHistoryEntry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Command responder type
type CommandResponder<T> = oneshot::Sender<Result<T>>;

/// Commands accepted by the [`SyncWorker`]
#[derive(Debug)]
pub enum SyncCommand {
    /// Start a run and schedule its first batch
    Start {
        request: StartRequest,
        resp: Option<CommandResponder<RunHandle>>,
    },
    /// Process the next slice of an active run
    ProcessNext { handle: RunHandle },
    Cancel {
        entity: String,
        resp: Option<CommandResponder<RunHistoryEntry>>,
    },
    /// Stop the worker loop
    Shutdown,
}

/// Schedules a follow-up invocation for a run
#[async_trait]
pub trait BatchScheduler: Send + Sync {
    async fn schedule(&self, handle: RunHandle, delay: Duration) -> Result<()>;
}

/// Re-sends `ProcessNext` into the worker channel after a delay
#[derive(Debug, Clone)]
pub struct ChannelScheduler {
    sender: mpsc::WeakSender<SyncCommand>,
}

impl ChannelScheduler {
    pub fn new(sender: &mpsc::Sender<SyncCommand>) -> Self {
        Self {
            sender: sender.downgrade(),
        }
    }
}

#[async_trait]
impl BatchScheduler for ChannelScheduler {
    async fn schedule(&self, handle: RunHandle, delay: Duration) -> Result<()> {
        let Some(sender) = self.sender.upgrade() else {
            return Err(SyncError::NotFound("worker channel closed".to_string()));
        };
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if sender.send(SyncCommand::ProcessNext { handle }).await.is_err() {
                debug!("Worker stopped before scheduled batch was delivered");
            }
        });
        Ok(())
    }
}

/// Counters reported when the worker stops
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub runs_started: u64,
    pub invocations: u64,
    pub runs_completed: u64,
    pub runs_cancelled: u64,
    pub runs_failed: u64,
    pub busy: u64,
}

pub struct SyncWorker {
    orchestrator: Arc<SyncOrchestrator>,
    receiver: mpsc::Receiver<SyncCommand>,
    scheduler: Arc<dyn BatchScheduler>,
    interval: Duration,
    stats: WorkerStats,
}

impl std::fmt::Debug for SyncWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncWorker")
            .field("interval", &self.interval)
            .field("stats", &self.stats)
            .finish()
    }
}

impl SyncWorker {
    /// Create a worker and the sender that feeds it
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        buffer_size: usize,
    ) -> (Self, mpsc::Sender<SyncCommand>) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        let interval = orchestrator.config().orchestrator.batch_interval();
        let worker = Self {
            scheduler: Arc::new(ChannelScheduler::new(&sender)),
            orchestrator,
            receiver,
            interval,
            stats: WorkerStats::default(),
        };
        (worker, sender)
    }

    /// Replace the follow-up scheduler (e.g. an external job queue)
    pub fn with_scheduler(mut self, scheduler: Arc<dyn BatchScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn spawn(self) -> JoinHandle<WorkerStats> {
        tokio::spawn(self.run())
    }

    /// Consume commands until `Shutdown` or until every sender is gone
    pub async fn run(mut self) -> WorkerStats {
        info!(interval_ms = self.interval.as_millis() as u64, "🔄 Sync worker started");

        while let Some(command) = self.receiver.recv().await {
            match command {
                SyncCommand::Start { request, resp } => {
                    let result = self.handle_start(request).await;
                    respond(resp, result);
                }
                SyncCommand::ProcessNext { handle } => self.handle_process_next(handle).await,
                SyncCommand::Cancel { entity, resp } => {
                    let result = self.orchestrator.cancel(&entity).await;
                    if result.is_ok() {
                        self.stats.runs_cancelled += 1;
                    }
                    respond(resp, result);
                }
                SyncCommand::Shutdown => {
                    info!("Sync worker shutting down");
                    break;
                }
            }
        }

        info!(stats = ?self.stats, "Sync worker stopped");
        self.stats
    }

    async fn handle_start(&mut self, request: StartRequest) -> Result<RunHandle> {
        let handle = self.orchestrator.start_with(request).await?;
        self.stats.runs_started += 1;
        self.schedule(handle.clone(), Duration::ZERO).await;
        Ok(handle)
    }

    async fn handle_process_next(&mut self, handle: RunHandle) {
        self.stats.invocations += 1;
        match self
            .orchestrator
            .process_next_batch(&handle, ProcessMode::Slice)
            .await
        {
            Ok(ProcessOutcome::Progress { .. }) => self.schedule(handle, self.interval).await,
            Ok(ProcessOutcome::Busy) => {
                self.stats.busy += 1;
                self.schedule(handle, self.interval).await;
            }
            Ok(ProcessOutcome::Completed { items_synced, .. }) => {
                self.stats.runs_completed += 1;
                info!(entity = %handle.entity, items_synced, "✅ Run completed");
            }
            Ok(ProcessOutcome::Cancelled) => {
                self.stats.runs_cancelled += 1;
                info!(entity = %handle.entity, "Run cancelled");
            }
            Err(err) if err.is_transient() => {
                warn!(entity = %handle.entity, error = %err, "Transient batch failure - rescheduling");
                self.schedule(handle, self.interval).await;
            }
            Err(err) => {
                self.stats.runs_failed += 1;
                error!(entity = %handle.entity, code = err.code(), error = %err, "Run stopped");
            }
        }
    }

    async fn schedule(&self, handle: RunHandle, delay: Duration) {
        let entity = handle.entity.clone();
        if let Err(err) = self.scheduler.schedule(handle, delay).await {
            warn!(entity = %entity, error = %err, "Could not schedule next batch");
        }
    }
}

fn respond<T>(resp: Option<CommandResponder<T>>, result: Result<T>) {
    match resp {
        Some(resp) => {
            if resp.send(result).is_err() {
                debug!("Command caller went away before the response");
            }
        }
        None => {
            if let Err(err) = result {
                warn!(error = %err, "Command failed");
            }
        }
    }
}
