//! Response cache implementation

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::engine::ClassificationResult;
use crate::store::{KvStore, MemoryStore, VectorIndex};
use crate::text::normalize_text;

/// Bounded reservoir of lookup latency samples.
const LATENCY_SAMPLES: usize = 512;

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Key prefix for the exact tier.
    pub key_prefix: String,
    /// Entry time-to-live in seconds.
    pub ttl_secs: u64,
    /// Maximum number of entries before LRU eviction.
    pub max_size: usize,
    /// Minimum token count for a query to be cacheable.
    pub min_query_tokens: usize,
    /// Minimum result confidence for a result to be cacheable.
    pub min_confidence: f64,
    /// Cosine similarity floor for semantic hits on the primary path.
    pub similarity_threshold: f64,
    /// Relaxed similarity floor used by LLM-failure fallback lookups.
    pub fallback_similarity_threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "cache".to_string(),
            ttl_secs: 86_400,
            max_size: 10_000,
            min_query_tokens: 3,
            min_confidence: 0.70,
            similarity_threshold: 0.95,
            fallback_similarity_threshold: 0.90,
        }
    }
}

/// One stored cache entry. Owned by the cache; only `hit_count` changes
/// after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Normalized form of the cached query.
    pub normalized_query: String,
    /// Unit-length query embedding, when one was available at store time.
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// The cached classification result.
    pub result: ClassificationResult,
    /// Insertion timestamp.
    pub stored_at: DateTime<Utc>,
    /// Time-to-live in seconds.
    pub ttl_secs: u64,
    /// Number of times this entry has answered a lookup.
    pub hit_count: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = (now - self.stored_at).num_seconds();
        age < 0 || age as u64 >= self.ttl_secs
    }

    fn remaining_ttl(&self, now: DateTime<Utc>) -> u64 {
        let age = (now - self.stored_at).num_seconds().max(0) as u64;
        self.ttl_secs.saturating_sub(age).max(1)
    }
}

/// Cache metrics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub degraded: bool,
    /// Median lookup latency in microseconds.
    pub p50_lookup_us: u64,
    /// 95th percentile lookup latency in microseconds.
    pub p95_lookup_us: u64,
    /// Queries with the most hits, descending.
    pub top_queries: Vec<(String, u64)>,
}

/// Two-tier response cache with TTL, LRU eviction, and degradation.
pub struct ResponseCache {
    config: CacheConfig,
    primary: Arc<dyn KvStore>,
    local: Arc<MemoryStore>,
    vectors: Arc<dyn VectorIndex>,
    degraded: AtomicBool,
    /// Recency order of entry hashes; values are the normalized queries so
    /// eviction can clean both tiers.
    recency: Mutex<LruCache<String, String>>,
    hits: AtomicU64,
    misses: AtomicU64,
    latencies_us: Mutex<VecDeque<u64>>,
    hit_counts: DashMap<String, u64>,
}

impl ResponseCache {
    /// Create a cache over the given stores.
    pub fn new(
        config: CacheConfig,
        primary: Arc<dyn KvStore>,
        vectors: Arc<dyn VectorIndex>,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.max_size.max(1)).expect("non-zero capacity");
        Self {
            config,
            primary,
            local: Arc::new(MemoryStore::new()),
            vectors,
            degraded: AtomicBool::new(false),
            recency: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            latencies_us: Mutex::new(VecDeque::with_capacity(LATENCY_SAMPLES)),
            hit_counts: DashMap::new(),
        }
    }

    /// True when the external store failed and the in-process fallback is
    /// serving.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Tiered lookup at the primary similarity threshold.
    pub async fn get(
        &self,
        query: &str,
        embedding: Option<&[f32]>,
    ) -> Option<ClassificationResult> {
        self.lookup(query, embedding, self.config.similarity_threshold)
            .await
    }

    /// Tiered lookup at the relaxed fallback threshold.
    pub async fn get_fallback(
        &self,
        query: &str,
        embedding: Option<&[f32]>,
    ) -> Option<ClassificationResult> {
        self.lookup(query, embedding, self.config.fallback_similarity_threshold)
            .await
    }

    async fn lookup(
        &self,
        query: &str,
        embedding: Option<&[f32]>,
        similarity_threshold: f64,
    ) -> Option<ClassificationResult> {
        let normalized = normalize_text(query).normalized;
        if normalized.is_empty() {
            return None;
        }
        let started = Instant::now();
        let hash = hash_query(&normalized);

        // Exact tier first.
        let outcome = match self.load_entry(&hash).await {
            Some(entry) => Some(entry),
            None => self.semantic_lookup(embedding, similarity_threshold).await,
        };

        self.record_latency(started);
        match outcome {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                *self
                    .hit_counts
                    .entry(entry.normalized_query.clone())
                    .or_insert(0) += 1;
                self.touch(&entry).await;
                Some(entry.result)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn semantic_lookup(
        &self,
        embedding: Option<&[f32]>,
        similarity_threshold: f64,
    ) -> Option<CacheEntry> {
        let embedding = embedding?;
        let candidates = match self.vectors.search(embedding, 3).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "semantic cache search failed");
                return None;
            }
        };

        for (hash, similarity) in candidates {
            if similarity < similarity_threshold {
                break;
            }
            match self.load_entry(&hash).await {
                Some(entry) => {
                    debug!(similarity, "semantic cache hit");
                    return Some(entry);
                }
                None => {
                    // Value expired out from under the index.
                    let _ = self.vectors.remove(&hash).await;
                }
            }
        }
        None
    }

    /// Load and validate one entry; expired entries are deleted
    /// opportunistically.
    async fn load_entry(&self, hash: &str) -> Option<CacheEntry> {
        let key = self.exact_key(hash);
        let raw = self.kv_get(&key).await?;
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "undecodable cache entry dropped");
                self.remove_entry(hash).await;
                return None;
            }
        };
        if entry.is_expired(Utc::now()) {
            self.remove_entry(hash).await;
            return None;
        }
        Some(entry)
    }

    /// Store a result when it clears the confidence and length guards.
    pub async fn set(
        &self,
        query: &str,
        embedding: Option<&[f32]>,
        result: &ClassificationResult,
    ) {
        if result.confidence < self.config.min_confidence {
            return;
        }
        let normalized = normalize_text(query);
        if normalized.tokens.len() < self.config.min_query_tokens {
            return;
        }

        let hash = hash_query(&normalized.normalized);
        let entry = CacheEntry {
            normalized_query: normalized.normalized.clone(),
            embedding: embedding.map(<[f32]>::to_vec).unwrap_or_default(),
            result: result.clone(),
            stored_at: Utc::now(),
            ttl_secs: self.config.ttl_secs,
            hit_count: 0,
        };

        let Ok(raw) = serde_json::to_string(&entry) else {
            return;
        };
        self.kv_set_ex(&self.exact_key(&hash), &raw, self.config.ttl_secs)
            .await;
        if let Some(embedding) = embedding {
            if let Err(e) = self.vectors.upsert(&hash, embedding.to_vec()).await {
                warn!(error = %e, "semantic index upsert failed");
            }
        }

        // Track recency; evict the least-recently-used entry at capacity.
        let evicted = {
            let mut recency = self.recency.lock();
            let evicted = if recency.len() >= self.config.max_size
                && !recency.contains(&hash)
            {
                recency.pop_lru()
            } else {
                None
            };
            recency.put(hash, normalized.normalized);
            evicted
        };
        if let Some((old_hash, _)) = evicted {
            self.remove_entry(&old_hash).await;
        }
    }

    /// Drop the entry for `query`, both tiers.
    pub async fn invalidate(&self, query: &str) {
        let normalized = normalize_text(query).normalized;
        let hash = hash_query(&normalized);
        self.remove_entry(&hash).await;
        self.recency.lock().pop(&hash);
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        let hashes: Vec<String> = {
            let recency = self.recency.lock();
            recency.iter().map(|(hash, _)| hash.clone()).collect()
        };
        for hash in hashes {
            self.remove_entry(&hash).await;
        }
        self.recency.lock().clear();
        let _ = self.vectors.clear().await;
        self.hit_counts.clear();
    }

    /// Metrics snapshot.
    pub async fn stats(&self) -> CacheStats {
        let (p50, p95) = {
            let samples = self.latencies_us.lock();
            percentiles(&samples)
        };
        let mut top: Vec<(String, u64)> = self
            .hit_counts
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(5);

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.recency.lock().len(),
            degraded: self.is_degraded(),
            p50_lookup_us: p50,
            p95_lookup_us: p95,
            top_queries: top,
        }
    }

    /// Re-probe the primary store and clear the degraded flag on success.
    pub async fn probe_primary(&self) -> bool {
        match self.primary.ping().await {
            Ok(()) => {
                self.degraded.store(false, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.degraded.store(true, Ordering::Relaxed);
                false
            }
        }
    }

    fn exact_key(&self, hash: &str) -> String {
        format!("{}:exact:{hash}", self.config.key_prefix)
    }

    async fn remove_entry(&self, hash: &str) {
        let key = self.exact_key(hash);
        self.kv_delete(&key).await;
        let _ = self.vectors.remove(hash).await;
    }

    /// Write back an incremented hit count, preserving the remaining TTL.
    async fn touch(&self, entry: &CacheEntry) {
        let mut updated = entry.clone();
        updated.hit_count += 1;
        let hash = hash_query(&updated.normalized_query);
        let ttl = updated.remaining_ttl(Utc::now());
        if let Ok(raw) = serde_json::to_string(&updated) {
            self.kv_set_ex(&self.exact_key(&hash), &raw, ttl).await;
        }
        self.recency
            .lock()
            .put(hash, updated.normalized_query.clone());
    }

    fn record_latency(&self, started: Instant) {
        let mut samples = self.latencies_us.lock();
        if samples.len() >= LATENCY_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(started.elapsed().as_micros() as u64);
    }

    // Degradation-aware store operations: after the first primary failure
    // all traffic shifts to the in-process store until a probe succeeds.

    async fn kv_get(&self, key: &str) -> Option<String> {
        if !self.is_degraded() {
            match self.primary.get(key).await {
                Ok(value) => return value,
                Err(e) => self.mark_degraded("get", &e),
            }
        }
        self.local.get(key).await.ok().flatten()
    }

    async fn kv_set_ex(&self, key: &str, value: &str, ttl_secs: u64) {
        if !self.is_degraded() {
            match self.primary.set_ex(key, value, ttl_secs).await {
                Ok(()) => return,
                Err(e) => self.mark_degraded("set", &e),
            }
        }
        let _ = self.local.set_ex(key, value, ttl_secs).await;
    }

    async fn kv_delete(&self, key: &str) {
        if !self.is_degraded() {
            match self.primary.delete(key).await {
                Ok(()) => {}
                Err(e) => self.mark_degraded("delete", &e),
            }
        }
        let _ = self.local.delete(key).await;
    }

    fn mark_degraded(&self, op: &str, error: &crate::store::StoreError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(op, error = %error, "cache store unreachable, degrading to in-process map");
        }
    }
}

fn hash_query(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

fn percentiles(samples: &VecDeque<u64>) -> (u64, u64) {
    if samples.is_empty() {
        return (0, 0);
    }
    let mut sorted: Vec<u64> = samples.iter().copied().collect();
    sorted.sort_unstable();
    let index = |q: f64| -> u64 {
        let position = ((sorted.len() as f64 - 1.0) * q).round() as usize;
        sorted[position.min(sorted.len() - 1)]
    };
    (index(0.50), index(0.95))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ClassificationStatus, ClassificationResult};
    use crate::matching::MatchSource;
    use crate::store::InMemoryVectorIndex;
    use crate::taxonomy::ActionCode;

    fn result(code: &str, confidence: f64) -> ClassificationResult {
        ClassificationResult::new(
            ActionCode::from(code),
            confidence,
            ClassificationStatus::LlmClassification,
            MatchSource::Fallback,
        )
    }

    fn cache() -> ResponseCache {
        ResponseCache::new(
            CacheConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(InMemoryVectorIndex::new()),
        )
    }

    #[tokio::test]
    async fn test_exact_set_get_roundtrip() {
        let cache = cache();
        let stored = result("SEARCH_PRODUCT", 0.92);
        cache.set("find red shoes", None, &stored).await;

        let hit = cache.get("find red shoes", None).await.unwrap();
        assert_eq!(hit.action_code.as_str(), "SEARCH_PRODUCT");
        // exact tier normalizes, so surface variants still hit
        assert!(cache.get("Find RED shoes!", None).await.is_some());
    }

    #[tokio::test]
    async fn test_low_confidence_not_cached() {
        let cache = cache();
        cache.set("find red shoes", None, &result("SEARCH_PRODUCT", 0.5)).await;
        assert!(cache.get("find red shoes", None).await.is_none());
    }

    #[tokio::test]
    async fn test_short_query_not_cached() {
        let cache = cache();
        cache.set("shoes", None, &result("SEARCH_PRODUCT", 0.95)).await;
        assert!(cache.get("shoes", None).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = cache();
        cache.set("find red shoes", None, &result("SEARCH_PRODUCT", 0.9)).await;
        cache.invalidate("find red shoes").await;
        assert!(cache.get("find red shoes", None).await.is_none());
    }

    #[tokio::test]
    async fn test_semantic_hit_above_threshold() {
        let cache = cache();
        let embedding = vec![1.0, 0.0, 0.0];
        cache
            .set("find red shoes", Some(&embedding), &result("SEARCH_PRODUCT", 0.92))
            .await;

        // Same direction, different surface query: semantic tier answers.
        let near = vec![0.999, 0.04, 0.0];
        let hit = cache.get("red shoes please", Some(&near)).await;
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn test_semantic_miss_below_threshold() {
        let cache = cache();
        let embedding = vec![1.0, 0.0, 0.0];
        cache
            .set("find red shoes", Some(&embedding), &result("SEARCH_PRODUCT", 0.92))
            .await;

        let orthogonal = vec![0.0, 1.0, 0.0];
        assert!(cache.get("totally different", Some(&orthogonal)).await.is_none());
    }

    #[tokio::test]
    async fn test_fallback_threshold_is_looser() {
        let cache = cache();
        let embedding = vec![1.0, 0.0];
        cache
            .set("find red shoes", Some(&embedding), &result("SEARCH_PRODUCT", 0.92))
            .await;

        // cosine ~0.92: below 0.95, above 0.90
        let near = vec![0.92, 0.392];
        assert!(cache.get("reddish shoes", Some(&near)).await.is_none());
        assert!(cache.get_fallback("reddish shoes", Some(&near)).await.is_some());
    }

    #[tokio::test]
    async fn test_lru_eviction_at_capacity() {
        let config = CacheConfig {
            max_size: 2,
            ..Default::default()
        };
        let cache = ResponseCache::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(InMemoryVectorIndex::new()),
        );
        cache.set("first query here", None, &result("A", 0.9)).await;
        cache.set("second query here", None, &result("B", 0.9)).await;
        // Touch the first so "second" is least recently used.
        cache.get("first query here", None).await.unwrap();
        cache.set("third query here", None, &result("C", 0.9)).await;

        assert!(cache.get("first query here", None).await.is_some());
        assert!(cache.get("second query here", None).await.is_none());
        assert!(cache.get("third query here", None).await.is_some());
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let cache = cache();
        cache.set("find red shoes", None, &result("SEARCH_PRODUCT", 0.9)).await;
        cache.get("find red shoes", None).await;
        cache.get("nothing cached here", None).await;

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!(!stats.degraded);
        assert_eq!(stats.top_queries[0].0, "find red shoes");
    }

    #[tokio::test]
    async fn test_hit_count_accumulates() {
        let cache = cache();
        cache.set("find red shoes", None, &result("SEARCH_PRODUCT", 0.9)).await;
        cache.get("find red shoes", None).await;
        cache.get("find red shoes", None).await;
        let stats = cache.stats().await;
        assert_eq!(stats.top_queries[0].1, 2);
    }
}
