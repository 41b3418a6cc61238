//! # System Constants
//!
//! Key layout, default timings and limits shared across the orchestration
//! components.

/// Keys used in the persistent key-value store
pub mod keys {
    pub const RUN_PREFIX: &str = "sync:run:";
    pub const RECOVERY_PREFIX: &str = "sync:recovery:";
    pub const RECOVERY_LAST: &str = "sync:recovery:last";
    pub const CANCEL_PREFIX: &str = "sync:cancel:";
    pub const HISTORY: &str = "sync:history";
    pub const BATCH_SIZE_PREFIX: &str = "sync:batch_size:";
    pub const RETRY_POLICY_PREFIX: &str = "sync:retry_policy:";
    pub const LAST_SUCCESS_PREFIX: &str = "sync:last_success:";

    pub fn run(entity: &str) -> String {
        format!("{RUN_PREFIX}{entity}")
    }

    pub fn recovery(entity: &str) -> String {
        format!("{RECOVERY_PREFIX}{entity}")
    }

    pub fn cancel(entity: &str) -> String {
        format!("{CANCEL_PREFIX}{entity}")
    }

    pub fn batch_size(entity: &str) -> String {
        format!("{BATCH_SIZE_PREFIX}{entity}")
    }

    pub fn last_success(entity: &str) -> String {
        format!("{LAST_SUCCESS_PREFIX}{entity}")
    }

    pub fn retry_policy(kind_type: &str, kind: &str) -> String {
        format!("{RETRY_POLICY_PREFIX}{kind_type}:{kind}")
    }
}

/// Orchestrator defaults
pub mod defaults {
    /// Lock TTL for a sync run (2 hours)
    pub const LOCK_TTL_SECONDS: u64 = 2 * 60 * 60;
    pub const LOCK_ACQUIRE_RETRIES: u32 = 3;
    pub const LOCK_RETRY_DELAY_MS: u64 = 250;

    /// A running run without progress for this long is treated as orphaned
    pub const STALE_RUN_SECONDS: u64 = 60 * 60;
    pub const IN_FLIGHT_TIMEOUT_SECONDS: u64 = 10 * 60;

    pub const HISTORY_LIMIT: usize = 50;
    pub const BATCHES_PER_INVOCATION: u32 = 1;
    pub const BATCH_INTERVAL_MS: u64 = 1_000;

    pub const BATCH_SIZE: usize = 50;
    pub const MIN_BATCH_SIZE: usize = 1;
    pub const MAX_BATCH_SIZE: usize = 500;
}

/// Cache growth manager limits
pub mod cache {
    pub const ACCESS_HISTORY_LIMIT: usize = 100;
    pub const GROWTH_HISTORY_LIMIT: usize = 10;

    /// Growth rate above which an entry is flagged (50% per hour)
    pub const RAPID_GROWTH_RATE: f64 = 0.5;
    pub const RAPID_GROWTH_BYTES_PER_HOUR: u64 = 1024 * 1024;

    /// Share of monitored entries evicted by an emergency cleanup
    pub const EMERGENCY_EVICTION_SHARE: f64 = 0.2;
    pub const ALWAYS_KEEP_PRIORITY_DIVISOR: f64 = 10.0;

    pub const FRAGMENT_SOFT_LIMIT: usize = 10;
}

/// Process-wide retry caps
pub mod retry {
    pub const GLOBAL_MAX_ATTEMPTS: u32 = 10;
    pub const GLOBAL_MAX_DELAY_SECONDS: f64 = 3600.0;
    pub const JITTER_MAX_SECONDS: f64 = 1.0;
}
