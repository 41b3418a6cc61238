//! # PostgreSQL Store
//!
//! Durable backend for run state, lock records and error logs. Queries are
//! built at runtime so the crate compiles without a live database.
//!
//! ## Tables
//!
//! - `sync_kv`: key/JSONB pairs (run state, recovery pointers, history, policies)
//! - `sync_locks`: one row per locked entity; the primary key provides
//!   create-if-absent semantics via `INSERT ... ON CONFLICT DO NOTHING`
//! - `sync_errors`: append-only per-item error records
//!
//! Schema lives in `migrations/0001_sync_core.sql` and is applied by
//! [`PgSyncStore::migrate`].

use super::errors::StoreResult;
use super::traits::{ErrorLogStore, KeyValueStore, LockStore};
use crate::models::{LockRecord, SyncErrorRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};

const SCHEMA: &str = include_str!("../../migrations/0001_sync_core.sql");

#[derive(Debug, FromRow)]
struct LockRow {
    entity: String,
    holder_operation_id: String,
    acquired_at: DateTime<Utc>,
    ttl_seconds: i64,
    last_heartbeat: DateTime<Utc>,
    metadata: Value,
}

impl From<LockRow> for LockRecord {
    fn from(row: LockRow) -> Self {
        Self {
            entity: row.entity,
            holder_operation_id: row.holder_operation_id,
            acquired_at: row.acquired_at,
            ttl_seconds: row.ttl_seconds.max(0) as u64,
            last_heartbeat: row.last_heartbeat,
            metadata: row.metadata,
        }
    }
}

#[derive(Debug, FromRow)]
struct ErrorRow {
    operation_id: String,
    entity: String,
    identifier: Option<String>,
    error_code: String,
    message: String,
    occurred_at: DateTime<Utc>,
}

impl From<ErrorRow> for SyncErrorRecord {
    fn from(row: ErrorRow) -> Self {
        Self {
            operation_id: row.operation_id,
            entity: row.entity,
            identifier: row.identifier,
            error_code: row.error_code,
            message: row.message,
            occurred_at: row.occurred_at,
        }
    }
}

/// Shared-pool backend implementing every durable store trait
#[derive(Debug, Clone)]
pub struct PgSyncStore {
    pool: PgPool,
}

impl PgSyncStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "🗄️ Connected sync store to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create tables if they do not exist
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        debug!("Applied sync store schema");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl KeyValueStore for PgSyncStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let value = sqlx::query_scalar::<_, Value>("SELECT value FROM sync_kv WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO sync_kv (key, value, updated_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM sync_kv WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, expected, new))]
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: Value,
    ) -> StoreResult<bool> {
        let result = match expected {
            None => {
                sqlx::query(
                    "INSERT INTO sync_kv (key, value, updated_at) VALUES ($1, $2, NOW()) \
                     ON CONFLICT (key) DO NOTHING",
                )
                .bind(key)
                .bind(new)
                .execute(&self.pool)
                .await?
            }
            Some(current) => {
                sqlx::query(
                    "UPDATE sync_kv SET value = $2, updated_at = NOW() \
                     WHERE key = $1 AND value = $3",
                )
                .bind(key)
                .bind(new)
                .bind(current.clone())
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM sync_kv WHERE key LIKE $1 ORDER BY key",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    fn provider_name(&self) -> &'static str {
        "postgres"
    }
}

#[async_trait]
impl LockStore for PgSyncStore {
    async fn try_insert(&self, record: &LockRecord) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO sync_locks \
             (entity, holder_operation_id, acquired_at, ttl_seconds, last_heartbeat, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (entity) DO NOTHING",
        )
        .bind(&record.entity)
        .bind(&record.holder_operation_id)
        .bind(record.acquired_at)
        .bind(record.ttl_seconds as i64)
        .bind(record.last_heartbeat)
        .bind(&record.metadata)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, entity: &str) -> StoreResult<Option<LockRecord>> {
        let row = sqlx::query_as::<_, LockRow>(
            "SELECT entity, holder_operation_id, acquired_at, ttl_seconds, last_heartbeat, metadata \
             FROM sync_locks WHERE entity = $1",
        )
        .bind(entity)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(LockRecord::from))
    }

    async fn remove(&self, entity: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM sync_locks WHERE entity = $1")
            .bind(entity)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_if_held_by(&self, entity: &str, holder: &str) -> StoreResult<bool> {
        let result =
            sqlx::query("DELETE FROM sync_locks WHERE entity = $1 AND holder_operation_id = $2")
                .bind(entity)
                .bind(holder)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch(&self, entity: &str, holder: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE sync_locks SET last_heartbeat = $3 \
             WHERE entity = $1 AND holder_operation_id = $2",
        )
        .bind(entity)
        .bind(holder)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list(&self) -> StoreResult<Vec<LockRecord>> {
        let rows = sqlx::query_as::<_, LockRow>(
            "SELECT entity, holder_operation_id, acquired_at, ttl_seconds, last_heartbeat, metadata \
             FROM sync_locks ORDER BY entity",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(LockRecord::from).collect())
    }
}

#[async_trait]
impl ErrorLogStore for PgSyncStore {
    async fn append(&self, record: SyncErrorRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO sync_errors \
             (operation_id, entity, identifier, error_code, message, occurred_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&record.operation_id)
        .bind(&record.entity)
        .bind(&record.identifier)
        .bind(&record.error_code)
        .bind(&record.message)
        .bind(record.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn for_run(&self, operation_id: &str) -> StoreResult<Vec<SyncErrorRecord>> {
        let rows = sqlx::query_as::<_, ErrorRow>(
            "SELECT operation_id, entity, identifier, error_code, message, occurred_at \
             FROM sync_errors WHERE operation_id = $1 ORDER BY id",
        )
        .bind(operation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SyncErrorRecord::from).collect())
    }
}
