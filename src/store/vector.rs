//! Vector index for the semantic cache tier

use async_trait::async_trait;
use parking_lot::RwLock;

use super::kv::StoreResult;

/// Vector store surface used by the semantic cache tier. Vectors are
/// unit-length; similarity is cosine via dot product.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace a vector under `id`.
    async fn upsert(&self, id: &str, vector: Vec<f32>) -> StoreResult<()>;

    /// Top-K ids by cosine similarity, descending. Ties break by id.
    async fn search(&self, vector: &[f32], top_k: usize) -> StoreResult<Vec<(String, f64)>>;

    /// Remove a vector. Removing an absent id is not an error.
    async fn remove(&self, id: &str) -> StoreResult<()>;

    /// Number of stored vectors.
    async fn len(&self) -> StoreResult<usize>;

    /// Drop all vectors.
    async fn clear(&self) -> StoreResult<()>;
}

/// Brute-force in-process cosine index. Adequate for the cache's bounded
/// entry count; larger deployments point the trait at an external store.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    vectors: RwLock<Vec<(String, Vec<f32>)>>,
}

impl InMemoryVectorIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, id: &str, vector: Vec<f32>) -> StoreResult<()> {
        let mut vectors = self.vectors.write();
        if let Some(slot) = vectors.iter_mut().find(|(existing, _)| existing == id) {
            slot.1 = vector;
        } else {
            vectors.push((id.to_string(), vector));
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> StoreResult<Vec<(String, f64)>> {
        let vectors = self.vectors.read();
        let mut scored: Vec<(String, f64)> = vectors
            .iter()
            .map(|(id, stored)| {
                let dot: f32 = stored.iter().zip(vector.iter()).map(|(a, b)| a * b).sum();
                (id.clone(), f64::from(dot))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn remove(&self, id: &str) -> StoreResult<()> {
        self.vectors.write().retain(|(existing, _)| existing != id);
        Ok(())
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.vectors.read().len())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.vectors.write().clear();
        Ok(())
    }
}
