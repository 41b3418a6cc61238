#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Sync Core
//!
//! Resumable, multi-entity data synchronization orchestration.
//!
//! ## Overview
//!
//! Sync Core coordinates long-running synchronizations between a local store
//! and a remote system where every unit of work runs inside a short-lived
//! invocation. The persisted run is the only continuity between invocations,
//! so a run can be killed mid-batch and picked up again without reprocessing
//! committed work.
//!
//! ## Key Features
//!
//! - **Resumable state machine**: runs advance batch by batch through
//!   compare-and-swap commits on the persisted run
//! - **Distributed locking**: one active run per entity, with heartbeat and
//!   orphan recovery
//! - **Dependency ordering**: multi-entity runs follow the prerequisite graph
//!   and reject cycles before any work starts
//! - **Layered retry policies**: built-in tables, aggressiveness levels, named
//!   policies from configuration or the store, explicit overrides, global caps
//! - **Adaptive batch sizing**: bounds per entity, memory pressure and
//!   observed throughput
//! - **Bounded working-set cache**: access classification, growth detection,
//!   compression or fragmentation of growing entries, emergency eviction
//!
//! ## Module Organization
//!
//! - [`orchestration`] - Orchestrator, lock, retry, scheduling and worker
//! - [`registry`] - Entity sync services and their capabilities
//! - [`store`] - Persistence traits with in-memory and PostgreSQL backends
//! - [`cache`] - Cache growth management and memory guard
//! - [`state_machine`] - Sync run lifecycle
//! - [`models`] - Runs, lock records, cache entries and history
//! - [`config`] - Layered configuration
//! - [`metrics`] - Per-operation counters and sync history
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sync_core::prelude::*;
//!
//! let registry = EntityRegistry::new().with(
//!     "products",
//!     EntityRegistration::new(Arc::new(ProductService::new(client)))
//!         .with_direction(Direction::RemoteToLocal),
//! );
//! let orchestrator = Arc::new(SyncOrchestrator::new(
//!     ConfigManager::load()?.config().clone(),
//!     Arc::new(registry),
//!     SyncCollaborators::in_memory(),
//! ));
//!
//! let (worker, commands) = SyncWorker::new(orchestrator, 64);
//! let worker = worker.spawn();
//! commands
//!     .send(SyncCommand::Start {
//!         request: StartRequest::new("products", Direction::RemoteToLocal),
//!         resp: None,
//!     })
//!     .await?;
//! ```

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod state_machine;
pub mod store;

pub use config::{ConfigManager, ConfigurationError, SyncConfig};
pub use error::{OperationResponse, Result, SyncError, SyncErrorContext};
pub use models::{Direction, RunHandle, SyncRun};
pub use orchestration::{
    MultiEntityCoordinator, ProcessMode, ProcessOutcome, SyncCollaborators, SyncOrchestrator,
    SyncWorker,
};
pub use registry::{EntityRegistration, EntityRegistry, EntitySyncService, TransferResult};
pub use state_machine::SyncStatus;

/// Commonly used types for hosts wiring up the orchestrator
pub mod prelude {
    pub use crate::config::{ConfigManager, SyncConfig};
    pub use crate::error::{Result, SyncError};
    pub use crate::models::{Direction, RunHandle};
    pub use crate::orchestration::{
        MultiEntityCoordinator, ProcessMode, ProcessOutcome, ResumeRequest, StartRequest,
        SyncCollaborators, SyncCommand, SyncOrchestrator, SyncWorker,
    };
    pub use crate::registry::{
        EntityRegistration, EntityRegistry, EntitySyncService, ItemError, TransferResult,
    };
    pub use std::sync::Arc;
}
