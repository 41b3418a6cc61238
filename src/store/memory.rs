//! In-memory store backends.
//!
//! Used by tests and single-process deployments. Each operation is atomic with
//! respect to the others on the same backend.

use super::errors::StoreResult;
use super::traits::{
    glob_match, CachePayload, EphemeralCache, ErrorLogStore, KeyValueStore, LockStore,
};
use crate::models::{LockRecord, SyncErrorRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// `HashMap` behind a read/write lock
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    values: RwLock<HashMap<String, Value>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.values.write().remove(key).is_some())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: Value,
    ) -> StoreResult<bool> {
        let mut values = self.values.write();
        if values.get(key) != expected {
            return Ok(false);
        }
        values.insert(key.to_string(), new);
        Ok(true)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .values
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}

/// Lock records in a concurrent map; `try_insert` uses the entry API
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    locks: DashMap<String, LockRecord>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_insert(&self, record: &LockRecord) -> StoreResult<bool> {
        match self.locks.entry(record.entity.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, entity: &str) -> StoreResult<Option<LockRecord>> {
        Ok(self.locks.get(entity).map(|r| r.value().clone()))
    }

    async fn remove(&self, entity: &str) -> StoreResult<bool> {
        Ok(self.locks.remove(entity).is_some())
    }

    async fn remove_if_held_by(&self, entity: &str, holder: &str) -> StoreResult<bool> {
        Ok(self
            .locks
            .remove_if(entity, |_, record| record.is_held_by(holder))
            .is_some())
    }

    async fn touch(&self, entity: &str, holder: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        match self.locks.get_mut(entity) {
            Some(mut record) if record.is_held_by(holder) => {
                record.last_heartbeat = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self) -> StoreResult<Vec<LockRecord>> {
        let mut records: Vec<LockRecord> = self.locks.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.entity.cmp(&b.entity));
        Ok(records)
    }
}

#[derive(Debug, Clone)]
struct CachedValue {
    payload: CachePayload,
    expires_at: Option<Instant>,
}

impl CachedValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// TTL-aware ephemeral cache; expired entries are dropped lazily on read
#[derive(Debug, Default)]
pub struct InMemoryEphemeralCache {
    entries: DashMap<String, CachedValue>,
}

impl InMemoryEphemeralCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl EphemeralCache for InMemoryEphemeralCache {
    async fn get(&self, key: &str) -> StoreResult<Option<CachePayload>> {
        let now = Instant::now();
        let live = self
            .entries
            .get(key)
            .map(|entry| (entry.is_live(now), entry.payload.clone()));

        match live {
            Some((true, payload)) => Ok(Some(payload)),
            Some((false, _)) => {
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        payload: CachePayload,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(
            key.to_string(),
            CachedValue {
                payload,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_pattern(&self, pattern: &str) -> StoreResult<u64> {
        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in matching {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Append-only error log
#[derive(Debug, Default)]
pub struct InMemoryErrorLog {
    records: Mutex<Vec<SyncErrorRecord>>,
}

impl InMemoryErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl ErrorLogStore for InMemoryErrorLog {
    async fn append(&self, record: SyncErrorRecord) -> StoreResult<()> {
        self.records.lock().push(record);
        Ok(())
    }

    async fn for_run(&self, operation_id: &str) -> StoreResult<Vec<SyncErrorRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.operation_id == operation_id)
            .cloned()
            .collect())
    }
}
