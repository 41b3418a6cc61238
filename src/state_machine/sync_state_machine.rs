use super::{
    errors::{StateMachineError, StateMachineResult},
    events::SyncEvent,
    states::SyncStatus,
};
use crate::models::SyncRun;
use chrono::Utc;
use tracing::{debug, warn};

/// Transition table for sync runs
///
/// The machine holds no state of its own: the run value is loaded from the
/// store, transitioned here, and persisted again by the orchestrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncStateMachine;

impl SyncStateMachine {
    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current: SyncStatus,
        event: &SyncEvent,
    ) -> StateMachineResult<SyncStatus> {
        let target = match (current, event) {
            // Startup chain
            (SyncStatus::Idle, SyncEvent::Validate) => SyncStatus::Validating,
            (SyncStatus::Validating, SyncEvent::AcquireLock) => SyncStatus::LockAcquiring,
            (SyncStatus::LockAcquiring, SyncEvent::Count) => SyncStatus::Counting,
            (SyncStatus::Counting, SyncEvent::Begin) => SyncStatus::Running,

            // Per-batch self loop
            (SyncStatus::Running, SyncEvent::BatchCommitted) => SyncStatus::Running,

            // Completion
            (SyncStatus::Running, SyncEvent::Complete) => SyncStatus::Completing,
            (SyncStatus::Completing, SyncEvent::Finalize) => SyncStatus::Completed,

            // Failure is reachable from every non-terminal state
            (from, SyncEvent::Fail(_)) if !from.is_terminal() => SyncStatus::Failed,

            // Cancellation stops anything that has not finished
            (from, SyncEvent::Cancel) if !from.is_terminal() => SyncStatus::Cancelled,

            // Resume re-enters running from a checkpoint
            (SyncStatus::Idle, SyncEvent::Resume)
            | (SyncStatus::Running, SyncEvent::Resume)
            | (SyncStatus::Failed, SyncEvent::Resume)
            | (SyncStatus::Cancelled, SyncEvent::Resume) => SyncStatus::Running,

            (from, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Apply an event to a run, stamping `last_update`
    pub fn transition(run: &mut SyncRun, event: SyncEvent) -> StateMachineResult<SyncStatus> {
        let from = run.status;
        let target = Self::determine_target_state(from, &event)?;

        if let Some(message) = event.error_message() {
            warn!(
                operation_id = %run.operation_id,
                entity = %run.entity,
                from = %from,
                error = message,
                "Sync run failing"
            );
            run.failure_reason = Some(message.to_string());
        }

        run.status = target;
        run.last_update = Utc::now();

        debug!(
            operation_id = %run.operation_id,
            entity = %run.entity,
            from = %from,
            to = %target,
            event = event.event_type(),
            "Sync run transition"
        );

        Ok(target)
    }
}
