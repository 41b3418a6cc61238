//! # Adaptive Batch Sizer
//!
//! Chooses the batch size for a run.
//!
//! ## Resolution
//!
//! explicit override → request value → saved per-entity value
//! (`sync:batch_size:{entity}`) → configured default, clamped to the entity's
//! min/max bounds.
//!
//! ## Adaptation
//!
//! - **Memory**: shrink when process memory exceeds the configured share of
//!   the limit; may grow when memory is plentiful unless the user limit must be
//!   respected.
//! - **Throughput**: keep a window of items/second samples per entity and nudge
//!   the size halfway toward the best-performing observed size.

use crate::cache::MemoryProbe;
use crate::config::BatchConfig;
use crate::constants::keys;
use crate::error::Result;
use crate::store::{load_json, save_json, KeyValueStore};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const MIN_THROUGHPUT_SAMPLES: usize = 3;
const PLENTIFUL_MEMORY_GROWTH: f64 = 1.25;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSample {
    pub batch_size: usize,
    pub items_per_second: f64,
}

pub struct AdaptiveBatchSizer {
    config: BatchConfig,
    memory_limit_bytes: u64,
    store: Arc<dyn KeyValueStore>,
    throughput: DashMap<String, VecDeque<ThroughputSample>>,
}

impl std::fmt::Debug for AdaptiveBatchSizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveBatchSizer")
            .field("config", &self.config)
            .field("memory_limit_bytes", &self.memory_limit_bytes)
            .finish()
    }
}

impl AdaptiveBatchSizer {
    pub fn new(config: BatchConfig, memory_limit_bytes: u64, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            config,
            memory_limit_bytes,
            store,
            throughput: DashMap::new(),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Pure precedence resolution, clamped to entity bounds
    pub fn resolve(
        &self,
        entity: &str,
        explicit_override: Option<usize>,
        request_value: Option<usize>,
        saved: Option<usize>,
    ) -> usize {
        let bounds = self.config.bounds_for(entity);
        let chosen = [explicit_override, request_value, saved]
            .into_iter()
            .flatten()
            .find(|size| *size > 0)
            .unwrap_or(bounds.default_size);
        bounds.clamp(chosen)
    }

    /// Resolve using the persisted per-entity value
    pub async fn resolve_for(
        &self,
        entity: &str,
        explicit_override: Option<usize>,
        request_value: Option<usize>,
    ) -> Result<usize> {
        let saved = self.saved_size(entity).await?;
        Ok(self.resolve(entity, explicit_override, request_value, saved))
    }

    pub async fn saved_size(&self, entity: &str) -> Result<Option<usize>> {
        Ok(load_json::<usize>(self.store.as_ref(), &keys::batch_size(entity)).await?)
    }

    pub async fn save_size(&self, entity: &str, size: usize) -> Result<()> {
        let size = self.config.bounds_for(entity).clamp(size);
        save_json(self.store.as_ref(), &keys::batch_size(entity), &size).await?;
        debug!(entity = %entity, size, "Saved batch size");
        Ok(())
    }

    /// Memory usage as a percentage of the configured limit
    pub fn memory_usage_percent(&self, probe: &dyn MemoryProbe) -> f64 {
        if self.memory_limit_bytes == 0 {
            return 0.0;
        }
        probe.used_bytes() as f64 / self.memory_limit_bytes as f64 * 100.0
    }

    /// Adjust `base` for current memory pressure
    pub fn memory_optimized(
        &self,
        entity: &str,
        base: usize,
        probe: &dyn MemoryProbe,
        respect_user_limit: bool,
    ) -> usize {
        let bounds = self.config.bounds_for(entity);
        let usage = self.memory_usage_percent(probe);
        let threshold = self.config.memory_threshold_percent;

        let adjusted = if usage > threshold {
            // Halfway between threshold and the limit, shrink twice
            let severe = usage > (threshold + 100.0) / 2.0;
            let factor = if severe {
                self.config.memory_reduction_factor.powi(2)
            } else {
                self.config.memory_reduction_factor
            };
            let reduced = ((base as f64) * factor).floor() as usize;
            info!(
                entity = %entity,
                usage_percent = usage,
                base,
                reduced,
                "📉 Reducing batch size under memory pressure"
            );
            reduced
        } else if usage < threshold / 2.0 && !respect_user_limit {
            ((base as f64) * PLENTIFUL_MEMORY_GROWTH).floor() as usize
        } else {
            base
        };

        let mut size = bounds.clamp(adjusted);
        if respect_user_limit {
            size = size.min(base.max(bounds.min_size));
        }
        size
    }

    pub fn record_throughput(&self, entity: &str, batch_size: usize, items: u64, elapsed: Duration) {
        let seconds = elapsed.as_secs_f64();
        if batch_size == 0 || seconds <= 0.0 {
            return;
        }

        let window = self.config.throughput_window.max(1);
        let mut samples = self.throughput.entry(entity.to_string()).or_default();
        samples.push_back(ThroughputSample {
            batch_size,
            items_per_second: items as f64 / seconds,
        });
        while samples.len() > window {
            samples.pop_front();
        }
    }

    pub fn throughput_samples(&self, entity: &str) -> Vec<ThroughputSample> {
        self.throughput
            .get(entity)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Nudge `base` toward the best-performing observed size
    pub fn throughput_adjusted(&self, entity: &str, base: usize, respect_user_limit: bool) -> usize {
        if !self.config.throughput_adjustment_enabled {
            return base;
        }

        let samples = self.throughput_samples(entity);
        if samples.len() < MIN_THROUGHPUT_SAMPLES {
            return base;
        }

        let mut by_size: BTreeMap<usize, (f64, u32)> = BTreeMap::new();
        for sample in &samples {
            let slot = by_size.entry(sample.batch_size).or_insert((0.0, 0));
            slot.0 += sample.items_per_second;
            slot.1 += 1;
        }

        let best = by_size
            .iter()
            .map(|(size, (sum, count))| (*size, sum / f64::from(*count)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(size, _)| size);

        let Some(best) = best else {
            return base;
        };

        let target = if best >= base {
            base + (best - base) / 2
        } else {
            base - (base - best) / 2
        };

        let bounds = self.config.bounds_for(entity);
        let mut size = bounds.clamp(target);
        if respect_user_limit {
            size = size.min(base.max(bounds.min_size));
        }

        if size != base {
            debug!(entity = %entity, base, best, size, "Throughput-adjusted batch size");
        }
        size
    }
}
