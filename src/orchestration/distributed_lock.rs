//! # Distributed Lock
//!
//! Cooperative per-entity mutual exclusion over a [`LockStore`].
//!
//! ## Semantics
//!
//! - **Acquire** is an atomic create-if-absent, retried with a short linear
//!   backoff. The current holder re-acquiring refreshes its heartbeat.
//! - **Orphans**: a record whose heartbeat is older than its TTL belongs to a
//!   crashed invocation and is force-released during acquire.
//! - **Heartbeat** extends the lease; the orchestrator renews it every batch.

use crate::config::LockConfig;
use crate::error::Result;
use crate::logging::log_lock_operation;
use crate::models::LockRecord;
use crate::store::LockStore;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of an orphan inspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanCheck {
    pub can_proceed: bool,
    pub lock_cleaned: bool,
    pub reason: String,
}

pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    config: LockConfig,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("config", &self.config)
            .finish()
    }
}

impl DistributedLock {
    pub fn new(store: Arc<dyn LockStore>, config: LockConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire with the configured TTL and retry count
    pub async fn acquire_default(&self, entity: &str, holder: &str, metadata: Value) -> Result<bool> {
        self.acquire(
            entity,
            holder,
            self.config.ttl_seconds,
            self.config.acquire_retries,
            metadata,
        )
        .await
    }

    /// Try up to `retries` times to take the lock for `holder`
    #[instrument(skip(self, metadata), fields(entity = %entity, holder = %holder))]
    pub async fn acquire(
        &self,
        entity: &str,
        holder: &str,
        ttl_seconds: u64,
        retries: u32,
        metadata: Value,
    ) -> Result<bool> {
        let attempts = retries.max(1);

        for attempt in 0..attempts {
            let record = LockRecord::new(entity, holder, ttl_seconds, metadata.clone());
            if self.store.try_insert(&record).await? {
                log_lock_operation("acquire", entity, Some(holder), "acquired");
                return Ok(true);
            }

            match self.store.get(entity).await? {
                None => {
                    debug!(attempt, "Lock vanished between insert and read - retrying");
                    continue;
                }
                Some(existing) if existing.is_held_by(holder) => {
                    self.store.touch(entity, holder, Utc::now()).await?;
                    debug!("Lock re-acquired by current holder");
                    return Ok(true);
                }
                Some(existing) if existing.is_expired(Utc::now()) => {
                    let released = self
                        .store
                        .remove_if_held_by(entity, &existing.holder_operation_id)
                        .await?;
                    warn!(
                        orphan_holder = %existing.holder_operation_id,
                        heartbeat_age_seconds = existing.heartbeat_age(Utc::now()).num_seconds(),
                        released,
                        "🔓 Force-released orphaned lock"
                    );
                    if self.store.try_insert(&record).await? {
                        log_lock_operation("acquire", entity, Some(holder), "acquired");
                        return Ok(true);
                    }
                    continue;
                }
                Some(existing) => {
                    debug!(
                        attempt,
                        current_holder = %existing.holder_operation_id,
                        "Lock busy"
                    );
                }
            }

            if attempt + 1 < attempts {
                let delay = self.config.retry_delay() * (attempt + 1);
                tokio::time::sleep(delay).await;
            }
        }

        log_lock_operation("acquire", entity, Some(holder), "contended");
        Ok(false)
    }

    /// Unconditional removal
    pub async fn release(&self, entity: &str) -> Result<bool> {
        let released = self.store.remove(entity).await?;
        if released {
            log_lock_operation("release", entity, None, "released");
        }
        Ok(released)
    }

    /// Release only if `holder` still owns the lock
    pub async fn release_if_held(&self, entity: &str, holder: &str) -> Result<bool> {
        let released = self.store.remove_if_held_by(entity, holder).await?;
        if released {
            log_lock_operation("release", entity, Some(holder), "released");
        }
        Ok(released)
    }

    /// Renew the lease for `holder`; false when the lock is gone or owned by another run
    pub async fn heartbeat(&self, entity: &str, holder: &str) -> Result<bool> {
        let renewed = self.store.touch(entity, holder, Utc::now()).await?;
        if !renewed {
            warn!(entity = %entity, holder = %holder, "Heartbeat on lock not held");
        }
        Ok(renewed)
    }

    pub async fn lock_info(&self, entity: &str) -> Result<Option<LockRecord>> {
        Ok(self.store.get(entity).await?)
    }

    pub async fn list_locks(&self) -> Result<Vec<LockRecord>> {
        Ok(self.store.list().await?)
    }

    /// Clean a lock whose heartbeat is older than `max_age` or its own TTL
    pub async fn check_and_clean_orphaned(
        &self,
        entity: &str,
        max_age: ChronoDuration,
    ) -> Result<OrphanCheck> {
        let Some(record) = self.store.get(entity).await? else {
            return Ok(OrphanCheck {
                can_proceed: true,
                lock_cleaned: false,
                reason: "no lock held".to_string(),
            });
        };

        let now = Utc::now();
        let heartbeat_age = record.heartbeat_age(now);
        if record.is_expired(now) || heartbeat_age > max_age {
            let cleaned = self
                .store
                .remove_if_held_by(entity, &record.holder_operation_id)
                .await?;
            info!(
                entity = %entity,
                holder = %record.holder_operation_id,
                heartbeat_age_seconds = heartbeat_age.num_seconds(),
                cleaned,
                "🧹 Orphaned lock cleanup"
            );
            return Ok(OrphanCheck {
                can_proceed: cleaned,
                lock_cleaned: cleaned,
                reason: format!(
                    "orphaned lock held by {} cleaned (heartbeat age {}s)",
                    record.holder_operation_id,
                    heartbeat_age.num_seconds()
                ),
            });
        }

        Ok(OrphanCheck {
            can_proceed: false,
            lock_cleaned: false,
            reason: format!(
                "lock held by {} (heartbeat age {}s)",
                record.holder_operation_id,
                heartbeat_age.num_seconds()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLockStore;
    use serde_json::json;

    fn lock() -> (DistributedLock, Arc<InMemoryLockStore>) {
        let store = Arc::new(InMemoryLockStore::new());
        let config = LockConfig {
            ttl_seconds: 60,
            acquire_retries: 2,
            retry_delay_ms: 1,
        };
        (DistributedLock::new(store.clone(), config), store)
    }

    #[tokio::test]
    async fn test_mutual_exclusion() {
        let (lock, _) = lock();
        assert!(lock.acquire_default("products", "op-1", json!({})).await.unwrap());
        assert!(!lock.acquire_default("products", "op-2", json!({})).await.unwrap());
        assert!(lock.acquire_default("orders", "op-2", json!({})).await.unwrap());

        let info = lock.lock_info("products").await.unwrap().unwrap();
        assert_eq!(info.holder_operation_id, "op-1");
    }

    #[tokio::test]
    async fn test_same_holder_reacquires() {
        let (lock, _) = lock();
        assert!(lock.acquire_default("products", "op-1", json!({})).await.unwrap());
        assert!(lock.acquire_default("products", "op-1", json!({})).await.unwrap());
    }

    #[tokio::test]
    async fn test_orphan_is_force_released_on_acquire() {
        let (lock, store) = lock();
        let mut orphan = LockRecord::new("products", "crashed", 60, json!({}));
        orphan.last_heartbeat = Utc::now() - ChronoDuration::seconds(120);
        assert!(store.try_insert(&orphan).await.unwrap());

        assert!(lock.acquire_default("products", "op-2", json!({})).await.unwrap());
        let info = lock.lock_info("products").await.unwrap().unwrap();
        assert!(info.is_held_by("op-2"));
    }

    #[tokio::test]
    async fn test_heartbeat_only_for_holder() {
        let (lock, _) = lock();
        lock.acquire_default("products", "op-1", json!({})).await.unwrap();
        assert!(lock.heartbeat("products", "op-1").await.unwrap());
        assert!(!lock.heartbeat("products", "op-2").await.unwrap());

        assert!(!lock.release_if_held("products", "op-2").await.unwrap());
        assert!(lock.release("products").await.unwrap());
        assert!(!lock.heartbeat("products", "op-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_check_and_clean_orphaned() {
        let (lock, store) = lock();
        let check = lock
            .check_and_clean_orphaned("products", ChronoDuration::minutes(5))
            .await
            .unwrap();
        assert!(check.can_proceed);
        assert!(!check.lock_cleaned);

        lock.acquire_default("products", "op-1", json!({})).await.unwrap();
        let check = lock
            .check_and_clean_orphaned("products", ChronoDuration::minutes(5))
            .await
            .unwrap();
        assert!(!check.can_proceed);

        let mut stale = store.get("products").await.unwrap().unwrap();
        store.remove("products").await.unwrap();
        stale.ttl_seconds = 3600;
        stale.last_heartbeat = Utc::now() - ChronoDuration::minutes(10);
        store.try_insert(&stale).await.unwrap();

        let check = lock
            .check_and_clean_orphaned("products", ChronoDuration::minutes(5))
            .await
            .unwrap();
        assert!(check.can_proceed);
        assert!(check.lock_cleaned);
        assert!(lock.lock_info("products").await.unwrap().is_none());
    }
}
