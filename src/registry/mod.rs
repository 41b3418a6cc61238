//! # Entity Service Registry
//!
//! Per-entity sync services and the capabilities the orchestrator consults
//! before and during a run.

pub mod entity_registry;
pub mod service;

pub use entity_registry::{EntityRegistration, EntityRegistry};
pub use service::{EntitySyncService, ItemError, TransferResult};
