//! Storage abstractions
//!
//! This module provides:
//! - The `KvStore` trait the cache, queue, and status store depend on
//! - A Redis-backed implementation for shared deployments
//! - An in-process `MemoryStore` used standalone and as the degraded
//!   fallback when the external store is unreachable
//! - The `VectorIndex` trait and an in-process cosine index for the
//!   semantic cache tier

mod kv;
mod memory;
mod redis_store;
mod vector;

pub use kv::{KvStore, StoreError, StoreResult};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use vector::{InMemoryVectorIndex, VectorIndex};
