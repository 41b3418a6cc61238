//! # Store Layer
//!
//! Persistence seams for run state, locks, the ephemeral working-set cache
//! and per-item error logs.
//!
//! ## Backends
//!
//! - **memory**: concurrent maps, for tests and single-process use
//! - **postgres** (feature `postgres`): durable tables behind a shared pool

pub mod errors;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod traits;

pub use errors::{StoreError, StoreResult};
pub use memory::{InMemoryEphemeralCache, InMemoryErrorLog, InMemoryKeyValueStore, InMemoryLockStore};
#[cfg(feature = "postgres")]
pub use postgres::PgSyncStore;
pub use traits::{
    glob_match, load_json, save_json, CachePayload, EphemeralCache, ErrorLogStore, KeyValueStore,
    LockStore,
};
