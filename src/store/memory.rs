//! In-process key-value store
//!
//! Backs standalone deployments and serves as the degraded fallback when the
//! external store is unreachable. Semantics match the Redis implementation:
//! per-key TTLs, opportunistic expiry on read, list push/range/trim.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::kv::{KvStore, StoreResult};

struct ValueEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl ValueEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| Instant::now() >= at)
    }
}

/// Mutex-protected in-process store.
#[derive(Default)]
pub struct MemoryStore {
    values: DashMap<String, ValueEntry>,
    lists: Mutex<std::collections::HashMap<String, VecDeque<String>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) value keys.
    pub fn len(&self) -> usize {
        self.values.iter().filter(|e| !e.value().is_expired()).count()
    }

    /// True when no live keys exist.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every key. Test and admin use.
    pub fn clear(&self) {
        self.values.clear();
        self.lists.lock().clear();
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        if let Some(entry) = self.values.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.values.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.values.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        self.values.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.values.remove(key);
        self.lists.lock().remove(key);
        Ok(())
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut lists = self.lists.lock();
        lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let lists = self.lists.lock();
        let Some(list) = lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as i64;
        let resolve = |index: i64| -> i64 {
            if index < 0 {
                (len + index).max(0)
            } else {
                index
            }
        };
        let start = resolve(start);
        let stop = resolve(stop).min(len - 1);
        if start > stop || len == 0 {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    async fn list_len(&self, key: &str) -> StoreResult<usize> {
        Ok(self.lists.lock().get(key).map_or(0, VecDeque::len))
    }

    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> StoreResult<()> {
        let kept = self.list_range(key, start, stop).await?;
        let mut lists = self.lists.lock();
        lists.insert(key.to_string(), kept.into());
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_key_reads_absent() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", 0).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_push_is_lifo() {
        let store = MemoryStore::new();
        store.list_push("l", "first").await.unwrap();
        store.list_push("l", "second").await.unwrap();
        let range = store.list_range("l", 0, -1).await.unwrap();
        assert_eq!(range, vec!["second", "first"]);
        assert_eq!(store.list_len("l").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_trim() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.list_push("l", &i.to_string()).await.unwrap();
        }
        store.list_trim("l", 0, 2).await.unwrap();
        assert_eq!(store.list_len("l").await.unwrap(), 3);
    }
}
