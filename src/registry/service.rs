//! Entity sync service contract implemented by per-entity adapters.

use crate::error::Result;
use crate::models::Direction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-item failure reported by a transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub identifier: Option<String>,
    pub code: String,
    pub message: String,
}

impl ItemError {
    pub fn new(
        identifier: Option<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            identifier,
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Outcome of transferring one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferResult {
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
    #[serde(default)]
    pub item_errors: Vec<ItemError>,
}

impl TransferResult {
    pub fn processed(processed: u64) -> Self {
        Self {
            processed,
            ..Default::default()
        }
    }

    pub fn with_skipped(mut self, skipped: u64) -> Self {
        self.skipped = skipped;
        self
    }

    pub fn with_errors(mut self, item_errors: Vec<ItemError>) -> Self {
        self.errors = item_errors.len() as u64;
        self.item_errors = item_errors;
        self
    }
}

/// Moves one entity type between the local store and the remote system
///
/// Errors should be classified (`SyncError::collaborator` with an
/// [`ErrorKind`](crate::orchestration::retry_policy::ErrorKind)) so the
/// orchestrator can retry transient failures.
#[async_trait]
pub trait EntitySyncService: Send + Sync {
    /// Number of items matching `filters` on the source side
    async fn count(&self, direction: Direction, filters: &Value) -> Result<u64>;

    async fn transfer_batch(
        &self,
        direction: Direction,
        filters: &Value,
        offset: u64,
        limit: usize,
    ) -> Result<TransferResult>;

    /// Reject filters the service cannot honor
    async fn validate(&self, _direction: Direction, _filters: &Value) -> Result<()> {
        Ok(())
    }

    /// Items available past `offset` that the initial count did not include
    async fn pending_beyond(&self, _direction: Direction, _filters: &Value, _offset: u64) -> Result<u64> {
        Ok(0)
    }
}
