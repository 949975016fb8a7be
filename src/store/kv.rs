//! Key-value store trait

use async_trait::async_trait;
use thiserror::Error;

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal key-value surface the cache, queue, and status store build on.
///
/// String values only; callers serialize their records as JSON. List
/// operations back the dead-letter queue and the usage log.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value. Expired keys read as absent.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Store a value without expiry.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Store a value that expires after `ttl_secs`.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Push a value to the head of a list.
    async fn list_push(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Read a list range (inclusive indices; -1 means the tail).
    async fn list_range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>>;

    /// List length; 0 for absent keys.
    async fn list_len(&self, key: &str) -> StoreResult<usize>;

    /// Trim a list to the inclusive range, dropping the rest.
    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> StoreResult<()>;

    /// Health probe.
    async fn ping(&self) -> StoreResult<()>;
}
