//! Redis-backed key-value store

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::kv::{KvStore, StoreResult};

/// Shared Redis store behind the [`KvStore`] trait.
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis. Fails fast when the server is unreachable so
    /// startup can fall back to the in-process store.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.connection.clone())
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<_, ()>(&mut self.connection.clone())
            .await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut self.connection.clone())
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut self.connection.clone())
            .await?;
        Ok(())
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<()> {
        redis::cmd("LPUSH")
            .arg(key)
            .arg(value)
            .query_async::<_, ()>(&mut self.connection.clone())
            .await?;
        Ok(())
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let values: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut self.connection.clone())
            .await?;
        Ok(values)
    }

    async fn list_len(&self, key: &str) -> StoreResult<usize> {
        let len: usize = redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut self.connection.clone())
            .await?;
        Ok(len)
    }

    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> StoreResult<()> {
        redis::cmd("LTRIM")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async::<_, ()>(&mut self.connection.clone())
            .await?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        redis::cmd("PING")
            .query_async::<_, String>(&mut self.connection.clone())
            .await?;
        Ok(())
    }
}
