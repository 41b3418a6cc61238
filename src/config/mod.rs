//! # Configuration
//!
//! Typed configuration for the sync core, loaded in layers by [`ConfigManager`].
//!
//! ## Sections
//!
//! - `orchestrator`: staleness, in-flight claims, history and invocation pacing
//! - `lock`: TTL and acquire retry behavior
//! - `retry`: global caps, aggressiveness level and named policies
//! - `batch`: default size, bounds and memory/throughput adaptation
//! - `cache`: memory limits and hot-entry threshold
//! - `dependencies`: entity prerequisite graph
//! - `database`: optional PostgreSQL connection settings
//!
//! Every field has a default, so an empty file is a valid configuration.

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::{defaults, retry};
use crate::models::FrequencyClass;
use crate::orchestration::retry_policy::{Aggressiveness, RetryPolicyOverride};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub orchestrator: OrchestratorConfig,
    pub lock: LockConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    pub cache: CacheConfig,
    pub dependencies: DependencyConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// A running run without progress for this long is force-cleared by `start`
    pub stale_run_seconds: u64,
    /// A batch claim older than this is treated as a crashed invocation
    pub in_flight_timeout_seconds: u64,
    pub history_limit: usize,
    /// Upper bound for `ProcessMode::Slice`
    pub batches_per_invocation: u32,
    /// Delay before the worker schedules the next invocation
    pub batch_interval_ms: u64,
    /// Process the first batch inside `start`
    pub process_first_batch_on_start: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stale_run_seconds: defaults::STALE_RUN_SECONDS,
            in_flight_timeout_seconds: defaults::IN_FLIGHT_TIMEOUT_SECONDS,
            history_limit: defaults::HISTORY_LIMIT,
            batches_per_invocation: defaults::BATCHES_PER_INVOCATION,
            batch_interval_ms: defaults::BATCH_INTERVAL_MS,
            process_first_batch_on_start: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn stale_run_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_run_seconds as i64)
    }

    pub fn in_flight_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.in_flight_timeout_seconds as i64)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub ttl_seconds: u64,
    pub acquire_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: defaults::LOCK_TTL_SECONDS,
            acquire_retries: defaults::LOCK_ACQUIRE_RETRIES,
            retry_delay_ms: defaults::LOCK_RETRY_DELAY_MS,
        }
    }
}

impl LockConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Ceiling applied to every resolved policy
    pub global_max_attempts: u32,
    pub global_max_delay_seconds: f64,
    pub jitter_max_seconds: f64,
    /// Active aggressiveness level, if any
    pub aggressiveness: Option<Aggressiveness>,
    /// Overrides per aggressiveness level, keyed by level name
    pub levels: HashMap<String, RetryPolicyOverride>,
    /// Named policies keyed by error kind name
    pub error_policies: HashMap<String, RetryPolicyOverride>,
    /// Named policies keyed by operation kind name
    pub operation_policies: HashMap<String, RetryPolicyOverride>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            global_max_attempts: retry::GLOBAL_MAX_ATTEMPTS,
            global_max_delay_seconds: retry::GLOBAL_MAX_DELAY_SECONDS,
            jitter_max_seconds: retry::JITTER_MAX_SECONDS,
            aggressiveness: None,
            levels: Aggressiveness::default_levels(),
            error_policies: HashMap::new(),
            operation_policies: HashMap::new(),
        }
    }
}

/// Per-entity batch bounds; unset fields fall back to the global values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityBatchBounds {
    pub default_size: Option<usize>,
    pub min_size: Option<usize>,
    pub max_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub default_size: usize,
    pub min_size: usize,
    pub max_size: usize,
    pub entities: HashMap<String, EntityBatchBounds>,
    /// Shrink batches once memory usage exceeds this share of the limit
    pub memory_threshold_percent: f64,
    /// Multiplier applied to the batch size under memory pressure
    pub memory_reduction_factor: f64,
    pub throughput_window: usize,
    pub throughput_adjustment_enabled: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_size: defaults::BATCH_SIZE,
            min_size: defaults::MIN_BATCH_SIZE,
            max_size: defaults::MAX_BATCH_SIZE,
            entities: HashMap::new(),
            memory_threshold_percent: 75.0,
            memory_reduction_factor: 0.5,
            throughput_window: 10,
            throughput_adjustment_enabled: true,
        }
    }
}

/// Effective bounds for one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBounds {
    pub default_size: usize,
    pub min_size: usize,
    pub max_size: usize,
}

impl ResolvedBounds {
    pub fn clamp(&self, size: usize) -> usize {
        size.clamp(self.min_size, self.max_size)
    }
}

impl BatchConfig {
    pub fn bounds_for(&self, entity: &str) -> ResolvedBounds {
        let overrides = self.entities.get(entity);
        let min_size = overrides
            .and_then(|b| b.min_size)
            .unwrap_or(self.min_size)
            .max(1);
        let max_size = overrides
            .and_then(|b| b.max_size)
            .unwrap_or(self.max_size)
            .max(min_size);
        let default_size = overrides
            .and_then(|b| b.default_size)
            .unwrap_or(self.default_size)
            .clamp(min_size, max_size);

        ResolvedBounds {
            default_size,
            min_size,
            max_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub memory_limit_bytes: u64,
    pub warning_threshold_percent: f64,
    pub critical_threshold_percent: f64,
    /// Entries at or above this frequency class are hot
    pub hot_threshold: FrequencyClass,
    pub default_ttl_seconds: u64,
    pub max_fragment_bytes: usize,
    /// Payloads smaller than this are never compressed
    pub compression_min_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 512 * 1024 * 1024,
            warning_threshold_percent: 75.0,
            critical_threshold_percent: 90.0,
            hot_threshold: FrequencyClass::Medium,
            default_ttl_seconds: 3600,
            max_fragment_bytes: 64 * 1024,
            compression_min_bytes: 4 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    pub skip_validation: bool,
    /// entity -> prerequisites
    pub graph: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

fn check_percent(field: &str, value: f64) -> ConfigResult<()> {
    if !(value > 0.0 && value <= 100.0) {
        return Err(ConfigurationError::invalid_value(
            field,
            value,
            "must be within (0, 100]",
        ));
    }
    Ok(())
}

fn check_override(field: &str, policy: &RetryPolicyOverride) -> ConfigResult<()> {
    if let Some(factor) = policy.backoff_factor {
        if factor < 1.0 {
            return Err(ConfigurationError::invalid_value(
                format!("{field}.backoff_factor"),
                factor,
                "backoff factor must be at least 1.0",
            ));
        }
    }
    if let Some(base) = policy.base_delay {
        if base < 0.0 {
            return Err(ConfigurationError::invalid_value(
                format!("{field}.base_delay"),
                base,
                "base delay cannot be negative",
            ));
        }
    }
    if let Some(max) = policy.max_delay {
        if max < 0.0 {
            return Err(ConfigurationError::invalid_value(
                format!("{field}.max_delay"),
                max,
                "max delay cannot be negative",
            ));
        }
    }
    Ok(())
}

impl SyncConfig {
    /// Reject inconsistent values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.lock.ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "lock.ttl_seconds",
                0,
                "lock TTL must be greater than 0",
            ));
        }
        if self.lock.acquire_retries == 0 {
            return Err(ConfigurationError::invalid_value(
                "lock.acquire_retries",
                0,
                "at least one acquire attempt is required",
            ));
        }

        if self.orchestrator.batches_per_invocation == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.batches_per_invocation",
                0,
                "must process at least one batch per invocation",
            ));
        }
        if self.orchestrator.history_limit == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.history_limit",
                0,
                "history limit must be greater than 0",
            ));
        }
        if self.orchestrator.in_flight_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.in_flight_timeout_seconds",
                0,
                "in-flight timeout must be greater than 0",
            ));
        }

        if self.batch.min_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "batch.min_size",
                0,
                "minimum batch size must be greater than 0",
            ));
        }
        if self.batch.min_size > self.batch.max_size {
            return Err(ConfigurationError::invalid_value(
                "batch.min_size",
                self.batch.min_size,
                format!("exceeds batch.max_size ({})", self.batch.max_size),
            ));
        }
        for (entity, bounds) in &self.batch.entities {
            if let (Some(min), Some(max)) = (bounds.min_size, bounds.max_size) {
                if min > max {
                    return Err(ConfigurationError::invalid_value(
                        format!("batch.entities.{entity}.min_size"),
                        min,
                        format!("exceeds max_size ({max})"),
                    ));
                }
            }
        }
        check_percent("batch.memory_threshold_percent", self.batch.memory_threshold_percent)?;
        if !(self.batch.memory_reduction_factor > 0.0 && self.batch.memory_reduction_factor <= 1.0)
        {
            return Err(ConfigurationError::invalid_value(
                "batch.memory_reduction_factor",
                self.batch.memory_reduction_factor,
                "must be within (0, 1]",
            ));
        }

        check_percent("cache.warning_threshold_percent", self.cache.warning_threshold_percent)?;
        check_percent(
            "cache.critical_threshold_percent",
            self.cache.critical_threshold_percent,
        )?;
        if self.cache.warning_threshold_percent >= self.cache.critical_threshold_percent {
            return Err(ConfigurationError::invalid_value(
                "cache.warning_threshold_percent",
                self.cache.warning_threshold_percent,
                "warning threshold must be below the critical threshold",
            ));
        }
        if self.cache.memory_limit_bytes == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.memory_limit_bytes",
                0,
                "memory limit must be greater than 0",
            ));
        }
        if self.cache.max_fragment_bytes == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.max_fragment_bytes",
                0,
                "fragment size must be greater than 0",
            ));
        }

        if self.retry.global_max_delay_seconds <= 0.0 {
            return Err(ConfigurationError::invalid_value(
                "retry.global_max_delay_seconds",
                self.retry.global_max_delay_seconds,
                "global max delay must be positive",
            ));
        }
        if self.retry.jitter_max_seconds < 0.0 {
            return Err(ConfigurationError::invalid_value(
                "retry.jitter_max_seconds",
                self.retry.jitter_max_seconds,
                "jitter cannot be negative",
            ));
        }
        for (name, policy) in &self.retry.levels {
            if name.parse::<Aggressiveness>().is_err() {
                return Err(ConfigurationError::invalid_value(
                    "retry.levels",
                    name,
                    "unknown aggressiveness level",
                ));
            }
            check_override(&format!("retry.levels.{name}"), policy)?;
        }
        for (name, policy) in &self.retry.error_policies {
            check_override(&format!("retry.error_policies.{name}"), policy)?;
        }
        for (name, policy) in &self.retry.operation_policies {
            check_override(&format!("retry.operation_policies.{name}"), policy)?;
        }

        for (entity, prerequisites) in &self.dependencies.graph {
            if entity.is_empty() || prerequisites.iter().any(String::is_empty) {
                return Err(ConfigurationError::missing_required_field(
                    "dependencies.graph",
                    "entity names cannot be empty",
                ));
            }
        }

        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                0,
                "pool size must be greater than 0",
            ));
        }

        Ok(())
    }
}
