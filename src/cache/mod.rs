//! Two-tier response cache
//!
//! This module provides:
//! - An exact tier keyed by `cache:exact:<sha256(normalized query)>`
//! - A semantic tier over a vector index (cosine similarity gate)
//! - TTL expiry with opportunistic deletion, LRU eviction at capacity
//! - Transparent degradation to an in-process store with a health flag
//! - Hit/miss/latency metrics and a top-queries leaderboard

mod response;

pub use response::{CacheConfig, CacheEntry, CacheStats, ResponseCache};
