//! Persistence traits consumed by the orchestration core.
//!
//! Implementations: in-memory (`memory`) and PostgreSQL (`postgres`).

use super::errors::StoreResult;
use crate::models::{LockRecord, SyncErrorRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Persistent key-value configuration and state store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> StoreResult<()>;

    /// Returns whether a value was removed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Write `new` only if the current value equals `expected` (`None` = absent)
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: Value,
    ) -> StoreResult<bool>;

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    fn provider_name(&self) -> &'static str;
}

/// Load and deserialize a typed value
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and store a typed value
pub async fn save_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    store.set(key, serde_json::to_value(value)?).await
}

/// Atomic create-if-absent storage for lock records
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Insert only when no record exists for the entity
    async fn try_insert(&self, record: &LockRecord) -> StoreResult<bool>;

    async fn get(&self, entity: &str) -> StoreResult<Option<LockRecord>>;

    /// Unconditional removal
    async fn remove(&self, entity: &str) -> StoreResult<bool>;

    /// Remove only if the record still belongs to `holder`
    async fn remove_if_held_by(&self, entity: &str, holder: &str) -> StoreResult<bool>;

    /// Update `last_heartbeat` when the record belongs to `holder`
    async fn touch(&self, entity: &str, holder: &str, at: DateTime<Utc>) -> StoreResult<bool>;

    async fn list(&self) -> StoreResult<Vec<LockRecord>>;
}

/// Value held by the ephemeral working-set cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachePayload {
    Json { value: Value },
    /// gzip-compressed JSON bytes
    Compressed { bytes: Vec<u8>, original_size: u64 },
    /// Value split across fragment keys, in order
    Fragmented {
        fragment_keys: Vec<String>,
        original_size: u64,
    },
}

impl CachePayload {
    pub fn json(value: Value) -> Self {
        Self::Json { value }
    }

    /// Bytes occupied by this payload itself
    pub fn stored_size(&self) -> u64 {
        match self {
            Self::Json { value } => serde_json::to_vec(value).map_or(0, |b| b.len() as u64),
            Self::Compressed { bytes, .. } => bytes.len() as u64,
            Self::Fragmented { fragment_keys, .. } => {
                fragment_keys.iter().map(|k| k.len() as u64).sum()
            }
        }
    }
}

/// Ephemeral keyed cache with TTL
#[async_trait]
pub trait EphemeralCache: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<CachePayload>>;

    async fn set(&self, key: &str, payload: CachePayload, ttl: Option<Duration>)
        -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Delete every key matching a `*` glob, returning the number removed
    async fn delete_pattern(&self, pattern: &str) -> StoreResult<u64>;

    async fn keys(&self) -> StoreResult<Vec<String>>;
}

/// Append-only error records keyed by run id
#[async_trait]
pub trait ErrorLogStore: Send + Sync {
    async fn append(&self, record: SyncErrorRecord) -> StoreResult<()>;

    async fn for_run(&self, operation_id: &str) -> StoreResult<Vec<SyncErrorRecord>>;
}

/// Minimal `*` glob matcher used for pattern deletes
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (index, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if index == 0 {
            match rest.strip_prefix(part) {
                Some(remaining) => rest = remaining,
                None => return false,
            }
        } else if index == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("sync:*", "sync:run:products"));
        assert!(glob_match("*:products", "sync:run:products"));
        assert!(glob_match("sync:*:products", "sync:run:products"));
        assert!(glob_match("exact", "exact"));
        assert!(glob_match("*", "anything"));
        assert!(!glob_match("sync:*", "cache:run"));
        assert!(!glob_match("sync:*:orders", "sync:run:products"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[test]
    fn test_payload_stored_size() {
        let payload = CachePayload::json(json!({"a": 1}));
        assert_eq!(payload.stored_size(), br#"{"a":1}"#.len() as u64);

        let compressed = CachePayload::Compressed {
            bytes: vec![0; 12],
            original_size: 100,
        };
        assert_eq!(compressed.stored_size(), 12);
    }
}
