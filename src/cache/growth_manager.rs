//! # Cache Growth Manager
//!
//! Keeps the ephemeral working-set cache bounded across thousands of batch
//! invocations.
//!
//! ## Responsibilities
//!
//! - **Classification**: access recency maps each entry to a frequency class;
//!   entries at or above the configured threshold are hot.
//! - **Retention**: hot entries, and `cleanup_after_sync` entries while a run
//!   is active, survive routine cleanup.
//! - **Growth monitoring**: entries growing faster than 50 %/hour or 1 MB/hour
//!   are flagged and optimized by compression or fragmentation, whichever
//!   scores higher.
//! - **Memory guard**: `check_memory` optimizes rapidly growing entries and
//!   runs routine cleanup on warning, emergency eviction on critical usage.

use super::compression::{compress_json, decompress_json};
use super::fragmentation::{efficiency_score, fragment, reassemble, Fragment};
use super::memory_probe::MemoryProbe;
use crate::config::CacheConfig;
use crate::constants::cache::{
    ACCESS_HISTORY_LIMIT, ALWAYS_KEEP_PRIORITY_DIVISOR, EMERGENCY_EVICTION_SHARE,
    GROWTH_HISTORY_LIMIT, RAPID_GROWTH_BYTES_PER_HOUR, RAPID_GROWTH_RATE,
};
use crate::error::{Result, SyncError};
use crate::models::{CacheEntry, FrequencyClass, SizeSample};
use crate::store::{CachePayload, EphemeralCache};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::{DashMap, DashSet};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Minimum score before an optimization is applied
const MIN_OPTIMIZATION_SCORE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryReport {
    pub status: MemoryStatus,
    pub used_bytes: u64,
    pub limit_bytes: u64,
    pub usage_percent: f64,
    /// Entries removed by the cleanup this check triggered
    pub cleaned: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryOptions {
    pub ttl: Option<Duration>,
    pub cleanup_after_sync: bool,
    pub always_keep: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyCleanupReport {
    pub cleaned: usize,
    pub attempted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthAlert {
    pub key: String,
    /// Relative growth per hour (0.5 = 50 %)
    pub growth_rate_per_hour: f64,
    pub bytes_per_hour: f64,
}

impl GrowthAlert {
    pub fn is_rapid(&self) -> bool {
        self.growth_rate_per_hour > RAPID_GROWTH_RATE
            || self.bytes_per_hour > RAPID_GROWTH_BYTES_PER_HOUR as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    Compression,
    Fragmentation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub key: String,
    /// `None` when no strategy scored high enough
    pub strategy: Option<OptimizationStrategy>,
    pub original_size: u64,
    pub stored_size: u64,
    pub score: f64,
}

pub struct CacheGrowthManager {
    config: CacheConfig,
    cache: Arc<dyn EphemeralCache>,
    probe: Arc<dyn MemoryProbe>,
    entries: DashMap<String, CacheEntry>,
    active_runs: DashSet<String>,
}

impl std::fmt::Debug for CacheGrowthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheGrowthManager")
            .field("config", &self.config)
            .field("monitored", &self.entries.len())
            .field("active_runs", &self.active_runs.len())
            .finish()
    }
}

fn fragment_key(key: &str, index: usize) -> String {
    format!("{key}:fragment:{index}")
}

impl CacheGrowthManager {
    pub fn new(
        config: CacheConfig,
        cache: Arc<dyn EphemeralCache>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        Self {
            config,
            cache,
            probe,
            entries: DashMap::new(),
            active_runs: DashSet::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn monitored_len(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Frequency class from access recency
    pub fn classify_access(entry: &CacheEntry, now: DateTime<Utc>) -> FrequencyClass {
        let Some(last) = entry.last_accessed else {
            return FrequencyClass::Never;
        };
        let elapsed = now - last;
        if elapsed < ChronoDuration::minutes(5) {
            FrequencyClass::VeryHigh
        } else if elapsed < ChronoDuration::hours(1) {
            FrequencyClass::High
        } else if elapsed < ChronoDuration::days(1) {
            FrequencyClass::Medium
        } else if elapsed < ChronoDuration::weeks(1) {
            FrequencyClass::Low
        } else {
            FrequencyClass::VeryLow
        }
    }

    pub fn is_hot(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        Self::classify_access(entry, now) >= self.config.hot_threshold
    }

    pub fn should_retain(&self, key: &str) -> bool {
        let now = Utc::now();
        self.entries.get(key).is_some_and(|entry| {
            self.is_hot(&entry, now) || (entry.cleanup_after_sync && !self.active_runs.is_empty())
        })
    }

    pub fn begin_run(&self, entity: &str) {
        self.active_runs.insert(entity.to_string());
    }

    /// Mark a run finished; once no run is active, drop `cleanup_after_sync` entries
    pub async fn end_run(&self, entity: &str) -> Result<usize> {
        self.active_runs.remove(entity);
        if !self.active_runs.is_empty() {
            return Ok(0);
        }

        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.cleanup_after_sync)
            .map(|e| e.key().clone())
            .collect();
        for key in &keys {
            self.remove(key).await?;
        }
        if !keys.is_empty() {
            debug!(count = keys.len(), "Dropped post-sync cache entries");
        }
        Ok(keys.len())
    }

    pub async fn put(&self, key: &str, value: Value, options: EntryOptions) -> Result<()> {
        let payload = CachePayload::json(value);
        let size = payload.stored_size();
        let ttl = options
            .ttl
            .or_else(|| Some(Duration::from_secs(self.config.default_ttl_seconds)));
        self.cache.set(key, payload, ttl).await?;

        let now = Utc::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::new(key, size, ttl.map(|d| d.as_secs())));
        entry.cleanup_after_sync = options.cleanup_after_sync;
        entry.always_keep = options.always_keep;
        entry.ttl_seconds = ttl.map(|d| d.as_secs());
        push_growth_sample(&mut entry, size, now);
        Ok(())
    }

    /// Read and decode a value, recording the access
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let Some(payload) = self.cache.get(key).await? else {
            self.entries.remove(key);
            return Ok(None);
        };

        let value = match payload {
            CachePayload::Json { value } => Some(value),
            CachePayload::Compressed { bytes, .. } => Some(decompress_json(&bytes)?),
            CachePayload::Fragmented { fragment_keys, .. } => {
                self.load_fragments(&fragment_keys).await?
            }
        };

        match value {
            Some(value) => {
                self.record_access_at(key, Utc::now());
                Ok(Some(value))
            }
            None => {
                warn!(key = %key, "Fragmented cache entry incomplete - dropping");
                self.remove(key).await?;
                Ok(None)
            }
        }
    }

    async fn load_fragments(&self, fragment_keys: &[String]) -> Result<Option<Value>> {
        let payloads =
            try_join_all(fragment_keys.iter().map(|fragment_key| self.cache.get(fragment_key)))
                .await?;

        let mut fragments = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match payload {
                Some(CachePayload::Json { value }) => {
                    fragments.push(serde_json::from_value::<Fragment>(value)?);
                }
                _ => return Ok(None),
            }
        }
        Ok(Some(reassemble(&fragments)))
    }

    /// Remove an entry, its fragments and its monitoring record
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let existed = self.cache.delete(key).await?;
        self.cache
            .delete_pattern(&format!("{key}:fragment:*"))
            .await?;
        let monitored = self.entries.remove(key).is_some();
        Ok(existed || monitored)
    }

    pub fn record_access_at(&self, key: &str, at: DateTime<Utc>) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.last_accessed = Some(at);
            entry.access_history.push_back(at);
            while entry.access_history.len() > ACCESS_HISTORY_LIMIT {
                entry.access_history.pop_front();
            }
            entry.access_frequency_class = Self::classify_access(&entry, at);
        }
    }

    pub fn record_write_at(&self, key: &str, size_bytes: u64, at: DateTime<Utc>) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            push_growth_sample(&mut entry, size_bytes, at);
        }
    }

    /// Growth between the oldest and newest size samples
    pub fn growth_of(entry: &CacheEntry) -> Option<GrowthAlert> {
        let first = entry.growth_history.front()?;
        let last = entry.growth_history.back()?;
        let hours = (last.at - first.at).num_milliseconds() as f64 / 3_600_000.0;
        if hours <= 0.0 {
            return None;
        }

        let delta = last.size_bytes as f64 - first.size_bytes as f64;
        let growth_rate_per_hour = if first.size_bytes == 0 {
            if delta > 0.0 {
                f64::INFINITY
            } else {
                0.0
            }
        } else {
            delta / first.size_bytes as f64 / hours
        };

        Some(GrowthAlert {
            key: entry.key.clone(),
            growth_rate_per_hour,
            bytes_per_hour: delta / hours,
        })
    }

    pub fn detect_rapid_growth(&self) -> Vec<GrowthAlert> {
        let mut alerts: Vec<GrowthAlert> = self
            .entries
            .iter()
            .filter_map(|entry| Self::growth_of(&entry))
            .filter(GrowthAlert::is_rapid)
            .collect();
        alerts.sort_by(|a, b| b.bytes_per_hour.total_cmp(&a.bytes_per_hour));
        alerts
    }

    /// Compress or fragment every rapidly growing entry
    pub async fn optimize_rapid_growth(&self) -> Result<Vec<OptimizationOutcome>> {
        let mut outcomes = Vec::new();
        for alert in self.detect_rapid_growth() {
            info!(
                key = %alert.key,
                growth_rate = alert.growth_rate_per_hour,
                bytes_per_hour = alert.bytes_per_hour,
                "📈 Rapid cache growth detected"
            );
            outcomes.push(self.optimize(&alert.key).await?);
        }
        Ok(outcomes)
    }

    /// Apply the higher-scoring of compression and fragmentation to one entry
    #[instrument(skip(self))]
    pub async fn optimize(&self, key: &str) -> Result<OptimizationOutcome> {
        let entry = self
            .entry(key)
            .ok_or_else(|| SyncError::NotFound(format!("cache entry {key}")))?;

        let value = match self.cache.get(key).await? {
            Some(CachePayload::Json { value }) => value,
            Some(other) => {
                let stored = other.stored_size();
                return Ok(OptimizationOutcome {
                    key: key.to_string(),
                    strategy: None,
                    original_size: stored,
                    stored_size: stored,
                    score: 0.0,
                });
            }
            None => return Err(SyncError::NotFound(format!("cache payload {key}"))),
        };

        let original_size = serde_json::to_vec(&value)?.len();
        let now = Utc::now();
        let ttl = remaining_ttl(&entry, now);

        let compressed = if original_size >= self.config.compression_min_bytes {
            let compressed = compress_json(&value)?;
            let score = compressed.space_saved();
            Some((compressed, score))
        } else {
            None
        };

        let fragments = if original_size > self.config.max_fragment_bytes {
            let fragments = fragment(&value, self.config.max_fragment_bytes);
            let score = efficiency_score(original_size, &fragments);
            Some((fragments, score))
        } else {
            None
        };

        let compression_score = compressed.as_ref().map_or(0.0, |(_, s)| *s);
        let fragmentation_score = fragments.as_ref().map_or(0.0, |(_, s)| *s);

        let mut outcome = OptimizationOutcome {
            key: key.to_string(),
            strategy: None,
            original_size: original_size as u64,
            stored_size: original_size as u64,
            score: 0.0,
        };

        if compression_score >= fragmentation_score && compression_score > MIN_OPTIMIZATION_SCORE {
            if let Some((compressed, score)) = compressed {
                let stored = compressed.bytes.len() as u64;
                self.cache
                    .set(
                        key,
                        CachePayload::Compressed {
                            bytes: compressed.bytes,
                            original_size: compressed.original_size,
                        },
                        ttl,
                    )
                    .await?;
                outcome.strategy = Some(OptimizationStrategy::Compression);
                outcome.stored_size = stored;
                outcome.score = score;
            }
        } else if fragmentation_score > MIN_OPTIMIZATION_SCORE {
            if let Some((fragments, score)) = fragments {
                let mut fragment_keys = Vec::with_capacity(fragments.len());
                let mut stored = 0;
                for (index, piece) in fragments.iter().enumerate() {
                    let fragment_key = fragment_key(key, index);
                    let payload = CachePayload::json(serde_json::to_value(piece)?);
                    stored += payload.stored_size();
                    self.cache.set(&fragment_key, payload, ttl).await?;
                    fragment_keys.push(fragment_key);
                }
                self.cache
                    .set(
                        key,
                        CachePayload::Fragmented {
                            fragment_keys,
                            original_size: original_size as u64,
                        },
                        ttl,
                    )
                    .await?;
                outcome.strategy = Some(OptimizationStrategy::Fragmentation);
                outcome.stored_size = stored;
                outcome.score = score;
            }
        }

        if outcome.strategy.is_some() {
            self.record_write_at(key, outcome.stored_size, now);
            info!(
                key = %key,
                strategy = ?outcome.strategy,
                original_size = outcome.original_size,
                stored_size = outcome.stored_size,
                "🗜️ Optimized cache entry"
            );
        }
        Ok(outcome)
    }

    /// Drop expired entries and every cold entry that is not retained
    pub async fn routine_cleanup(&self) -> Result<usize> {
        let now = Utc::now();
        let scanned: Vec<(String, bool)> = self
            .entries
            .iter()
            .filter(|entry| entry.is_expired(now) || !entry.always_keep)
            .map(|entry| (entry.key().clone(), entry.is_expired(now)))
            .collect();
        // Retention is checked outside the iteration to avoid re-entering shard locks
        let candidates: Vec<String> = scanned
            .into_iter()
            .filter(|(key, expired)| *expired || !self.should_retain(key))
            .map(|(key, _)| key)
            .collect();

        for key in &candidates {
            self.remove(key).await?;
        }
        if !candidates.is_empty() {
            debug!(removed = candidates.len(), "Routine cache cleanup");
        }
        Ok(candidates.len())
    }

    /// Eviction priority: larger and older entries go first
    pub fn eviction_priority(entry: &CacheEntry, now: DateTime<Utc>) -> f64 {
        let priority = 0.7 * entry.size_mb() + 0.3 * entry.age_hours(now);
        if entry.always_keep {
            priority / ALWAYS_KEEP_PRIORITY_DIVISOR
        } else {
            priority
        }
    }

    /// Evict the top share of entries by priority
    pub async fn emergency_cleanup(&self) -> Result<EmergencyCleanupReport> {
        let now = Utc::now();
        let mut ranked: Vec<(String, f64)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), Self::eviction_priority(&entry, now)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let attempted = if ranked.is_empty() {
            0
        } else {
            ((ranked.len() as f64 * EMERGENCY_EVICTION_SHARE).ceil() as usize).max(1)
        };

        let mut cleaned = 0;
        for (key, _) in ranked.into_iter().take(attempted) {
            match self.remove(&key).await {
                Ok(_) => cleaned += 1,
                Err(err) => warn!(key = %key, error = %err, "Emergency eviction failed"),
            }
        }

        warn!(cleaned, attempted, "🚨 Emergency cache cleanup");
        Ok(EmergencyCleanupReport { cleaned, attempted })
    }

    fn measure(&self) -> (u64, f64) {
        let used = self.probe.used_bytes();
        let percent = used as f64 / self.config.memory_limit_bytes.max(1) as f64 * 100.0;
        (used, percent)
    }

    fn status_for(&self, percent: f64) -> MemoryStatus {
        if percent >= self.config.critical_threshold_percent {
            MemoryStatus::Critical
        } else if percent >= self.config.warning_threshold_percent {
            MemoryStatus::Warning
        } else {
            MemoryStatus::Normal
        }
    }

    /// Classify memory usage, cleaning up as needed
    ///
    /// Returns [`SyncError::Memory`] when usage is still critical after
    /// emergency cleanup.
    pub async fn check_memory(&self) -> Result<MemoryReport> {
        let (used, percent) = self.measure();
        let limit = self.config.memory_limit_bytes;

        match self.status_for(percent) {
            MemoryStatus::Normal => Ok(MemoryReport {
                status: MemoryStatus::Normal,
                used_bytes: used,
                limit_bytes: limit,
                usage_percent: percent,
                cleaned: 0,
            }),
            MemoryStatus::Warning => {
                let optimized = self.optimize_rapid_growth().await?;
                if !optimized.is_empty() {
                    debug!(optimized = optimized.len(), "Optimized growing entries under memory pressure");
                }
                let cleaned = self.routine_cleanup().await?;
                Ok(MemoryReport {
                    status: MemoryStatus::Warning,
                    used_bytes: used,
                    limit_bytes: limit,
                    usage_percent: percent,
                    cleaned,
                })
            }
            MemoryStatus::Critical => {
                let report = self.emergency_cleanup().await?;
                let (used_after, percent_after) = self.measure();
                if self.status_for(percent_after) == MemoryStatus::Critical {
                    return Err(SyncError::Memory {
                        message: format!(
                            "usage {percent_after:.1}% still critical after evicting {} entries",
                            report.cleaned
                        ),
                        used_bytes: used_after,
                        limit_bytes: limit,
                    });
                }
                Ok(MemoryReport {
                    status: self.status_for(percent_after),
                    used_bytes: used_after,
                    limit_bytes: limit,
                    usage_percent: percent_after,
                    cleaned: report.cleaned,
                })
            }
        }
    }
}

fn push_growth_sample(entry: &mut CacheEntry, size_bytes: u64, at: DateTime<Utc>) {
    entry.size_bytes = size_bytes;
    entry.growth_history.push_back(SizeSample { at, size_bytes });
    while entry.growth_history.len() > GROWTH_HISTORY_LIMIT {
        entry.growth_history.pop_front();
    }
}

fn remaining_ttl(entry: &CacheEntry, now: DateTime<Utc>) -> Option<Duration> {
    let ttl = entry.ttl_seconds?;
    let age = (now - entry.created_at).num_seconds().max(0) as u64;
    Some(Duration::from_secs(ttl.saturating_sub(age).max(1)))
}
