//! Embedding matcher
//!
//! Encodes the query through an abstract `Encoder` and scores every action
//! code by cosine similarity against precomputed reference vectors (mean of
//! each intent's example encodings, L2-normalized). The encoder is
//! lazy-initialized on first use; if initialization fails the matcher stays
//! empty-handed and reports unhealthy so the decision engine can continue
//! keyword-only.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, warn};

use crate::taxonomy::{ActionCode, IntentCatalog};
use crate::text::normalize_text;

use super::{rank_candidates, Candidate, MatchSource};

/// Native dimension of the default encoder.
pub const DEFAULT_DIMENSION: usize = 384;

/// Default capacity of the query-embedding cache.
pub const QUERY_CACHE_CAPACITY: usize = 512;

/// Encoder errors
#[derive(Error, Debug, Clone)]
pub enum EncoderError {
    #[error("Encoder initialization failed: {0}")]
    InitFailed(String),

    #[error("Encoding failed: {0}")]
    EncodeFailed(String),
}

/// Abstract sentence encoder. Implementations must be deterministic within a
/// session for a fixed model.
pub trait Encoder: Send + Sync {
    /// Encode `text` into a vector of the encoder's native dimension.
    fn encode(&self, text: &str) -> Result<Vec<f32>, EncoderError>;

    /// Native output dimension.
    fn dimension(&self) -> usize;
}

/// Deterministic hashed n-gram projection encoder.
///
/// A stand-in with the encoder contract (fixed dimension, unit-length,
/// deterministic): word unigrams and character trigrams are hashed into a
/// fixed-width signed accumulator, then L2-normalized. Deployments plug a
/// real sentence encoder through the [`Encoder`] trait.
pub struct HashedNgramEncoder {
    dimension: usize,
}

impl HashedNgramEncoder {
    /// Create an encoder with the given output dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashedNgramEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl Encoder for HashedNgramEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>, EncoderError> {
        let normalized = normalize_text(text);
        let mut accumulator = vec![0.0f32; self.dimension];

        let mut features: Vec<String> = Vec::new();
        for token in &normalized.tokens {
            features.push(format!("w:{token}"));
            let chars: Vec<char> = token.chars().collect();
            for window in chars.windows(3) {
                features.push(format!("c:{}{}{}", window[0], window[1], window[2]));
            }
        }

        for feature in &features {
            let mut hasher = DefaultHasher::new();
            feature.hash(&mut hasher);
            let h = hasher.finish();
            let index = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            accumulator[index] += sign;
        }

        l2_normalize(&mut accumulator);
        Ok(accumulator)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Reference vectors for every action code, all of one dimension.
struct ReferenceSet {
    dimension: usize,
    vectors: Vec<(ActionCode, Vec<f32>)>,
}

struct MatcherState {
    encoder: Arc<dyn Encoder>,
    references: ReferenceSet,
}

enum LazyState {
    Uninitialized,
    Failed,
    Ready(Arc<MatcherState>),
}

type EncoderFactory = Box<dyn Fn() -> Result<Arc<dyn Encoder>, EncoderError> + Send + Sync>;

/// Embedding matcher with lazy encoder initialization and a bounded
/// query-embedding cache.
pub struct EmbeddingMatcher {
    factory: EncoderFactory,
    catalog: Arc<IntentCatalog>,
    state: Mutex<LazyState>,
    query_cache: Mutex<LruCache<String, Arc<Vec<f32>>>>,
    healthy: AtomicBool,
}

impl EmbeddingMatcher {
    /// Create a matcher that initializes its encoder through `factory` on
    /// first use.
    pub fn new(
        factory: impl Fn() -> Result<Arc<dyn Encoder>, EncoderError> + Send + Sync + 'static,
        catalog: Arc<IntentCatalog>,
    ) -> Self {
        Self {
            factory: Box::new(factory),
            catalog,
            state: Mutex::new(LazyState::Uninitialized),
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_CAPACITY).expect("non-zero"),
            )),
            healthy: AtomicBool::new(true),
        }
    }

    /// Matcher over the default deterministic encoder.
    pub fn with_default_encoder(catalog: Arc<IntentCatalog>) -> Self {
        Self::new(
            || Ok(Arc::new(HashedNgramEncoder::default()) as Arc<dyn Encoder>),
            catalog,
        )
    }

    /// True until encoder initialization has failed.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Embed a query, consulting the bounded cache first. Returns `None`
    /// when the encoder is unavailable.
    pub fn embed(&self, query: &str) -> Option<Arc<Vec<f32>>> {
        let key = normalize_text(query).normalized;
        if key.is_empty() {
            return None;
        }

        {
            let mut cache = self.query_cache.lock();
            if let Some(hit) = cache.get(&key) {
                return Some(Arc::clone(hit));
            }
        }

        let state = self.state()?;
        match state.encoder.encode(&key) {
            Ok(mut vector) => {
                l2_normalize(&mut vector);
                let vector = Arc::new(vector);
                self.query_cache.lock().put(key, Arc::clone(&vector));
                Some(vector)
            }
            Err(e) => {
                warn!(error = %e, "query encoding failed");
                None
            }
        }
    }

    /// Score every action code by cosine similarity and return the top-N,
    /// rescaled from [-1, 1] to [0, 1], with `source = embedding`.
    pub fn search(&self, query: &str, top_n: usize) -> Vec<Candidate> {
        if top_n == 0 {
            return Vec::new();
        }
        let Some(state) = self.state() else {
            return Vec::new();
        };
        let Some(query_vector) = self.embed(query) else {
            return Vec::new();
        };

        let mut candidates: Vec<Candidate> = state
            .references
            .vectors
            .iter()
            .map(|(code, reference)| {
                let cosine = dot(&query_vector, reference) as f64;
                // Both vectors are unit-length; rescale [-1, 1] -> [0, 1].
                let score = ((cosine + 1.0) / 2.0).clamp(0.0, 1.0);
                Candidate::new(code.clone(), score, MatchSource::Embedding)
            })
            .collect();

        rank_candidates(&mut candidates);
        candidates.truncate(top_n);
        candidates
    }

    /// Initialize (once) and return the encoder + reference vectors.
    fn state(&self) -> Option<Arc<MatcherState>> {
        let mut guard = self.state.lock();
        match &*guard {
            LazyState::Ready(state) => Some(Arc::clone(state)),
            LazyState::Failed => None,
            LazyState::Uninitialized => match self.initialize() {
                Ok(state) => {
                    let state = Arc::new(state);
                    *guard = LazyState::Ready(Arc::clone(&state));
                    Some(state)
                }
                Err(e) => {
                    error!(error = %e, "embedding encoder unavailable, keyword-only mode");
                    self.healthy.store(false, Ordering::Relaxed);
                    *guard = LazyState::Failed;
                    None
                }
            },
        }
    }

    fn initialize(&self) -> Result<MatcherState, EncoderError> {
        let encoder = (self.factory)()?;
        let dimension = encoder.dimension();

        let mut vectors = Vec::with_capacity(self.catalog.len());
        for definition in self.catalog.definitions() {
            let mut mean = vec![0.0f32; dimension];
            let mut encoded = 0usize;
            for example in &definition.examples {
                match encoder.encode(example) {
                    Ok(vector) if vector.len() == dimension => {
                        for (m, v) in mean.iter_mut().zip(vector.iter()) {
                            *m += v;
                        }
                        encoded += 1;
                    }
                    Ok(_) => {
                        return Err(EncoderError::EncodeFailed(format!(
                            "dimension mismatch for {}",
                            definition.code
                        )));
                    }
                    Err(e) => {
                        warn!(code = %definition.code, error = %e, "example encoding failed");
                    }
                }
            }
            if encoded == 0 {
                continue;
            }
            for m in mean.iter_mut() {
                *m /= encoded as f32;
            }
            l2_normalize(&mut mean);
            vectors.push((definition.code.clone(), mean));
        }

        Ok(MatcherState {
            encoder,
            references: ReferenceSet { dimension, vectors },
        })
    }
}
