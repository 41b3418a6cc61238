use thiserror::Error;

/// Errors raised by persistence backends
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Backend unreachable or query failed
    #[error("Store backend error: {0}")]
    Backend(String),

    /// Failed to serialize or deserialize a stored value
    #[error("Store serialization error: {0}")]
    Serialization(String),

    /// Store operation timed out
    #[error("Store operation timed out: {0}")]
    Timeout(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => StoreError::Timeout("connection pool timed out".into()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}
