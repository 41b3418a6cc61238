//! # Orchestration Engine
//!
//! Resumable, lock-protected sync runs and the components that shape them.
//!
//! ## Core Components
//!
//! - **SyncOrchestrator**: drives one run per entity through claim, transfer
//!   and commit across short-lived invocations
//! - **DistributedLock**: per-entity mutual exclusion with heartbeat and
//!   orphan recovery
//! - **RetryPolicyResolver / RetryExecutor**: layered retry policies and the
//!   retry loop around collaborator calls
//! - **DependencyScheduler**: topological ordering and prerequisite checks
//! - **AdaptiveBatchSizer**: batch size from configuration, memory pressure
//!   and observed throughput
//! - **MultiEntityCoordinator**: dependency-ordered runs over a set of entities
//! - **SyncWorker**: channel-fed driver that keeps runs moving

pub mod batch_sizer;
pub mod dependency_scheduler;
pub mod distributed_lock;
pub mod multi_entity;
pub mod retry_executor;
pub mod retry_policy;
pub mod sync_orchestrator;
pub mod types;
pub mod worker;

pub use batch_sizer::{AdaptiveBatchSizer, ThroughputSample};
pub use dependency_scheduler::{
    DependencyCheck, DependencyGraph, DependencyScheduler, PersistedSuccess,
};
pub use distributed_lock::{DistributedLock, OrphanCheck};
pub use multi_entity::{
    EntityRunReport, EntityRunStatus, MultiEntityCoordinator, MultiEntityReport,
};
pub use retry_executor::{RetryExecutor, RetryOutcome};
pub use retry_policy::{
    Aggressiveness, ErrorKind, KindType, OperationKind, RetryKind, RetryPolicy,
    RetryPolicyOverride, RetryPolicyResolver,
};
pub use sync_orchestrator::{SyncCollaborators, SyncOrchestrator};
pub use types::{
    BatchClassification, ProcessMode, ProcessOutcome, ResumeRequest, StartRequest, SyncProgress,
};
pub use worker::{BatchScheduler, ChannelScheduler, SyncCommand, SyncWorker, WorkerStats};
