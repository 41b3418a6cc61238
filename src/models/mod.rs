//! # Data Model
//!
//! Persisted and derived records: sync runs, lock records, cache entries,
//! run history and per-item error records.

pub mod cache_entry;
pub mod lock_record;
pub mod run_history;
pub mod sync_run;

pub use cache_entry::{CacheEntry, FrequencyClass, SizeSample};
pub use lock_record::LockRecord;
pub use run_history::{RunHistoryEntry, SyncErrorRecord};
pub use sync_run::{BatchPlan, Direction, InFlightBatch, RunHandle, SyncRun};
