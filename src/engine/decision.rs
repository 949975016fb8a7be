//! Request-path state machine
//!
//! One classification request flows synchronously through:
//! normalize → keyword → priority short-circuit → embedding → blend →
//! confidence gate → {answer | cache lookup | enqueue}. The active config
//! variant is snapshotted exactly once at entry; no stage suspends except
//! the cache and queue store round-trips.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::alerts::FallbackManager;
use crate::cache::ResponseCache;
use crate::config::{ConfigManager, ConfigVariant};
use crate::entities::EntityExtractor;
use crate::matching::{
    blend, evaluate_gate, BlendWeights, Candidate, EmbeddingMatcher, GateDecision, KeywordMatcher,
    MatchSource,
};
use crate::queue::{EscalationQueue, QueueError, QueuePayload, QueuePriority};
use crate::status::{RequestStatus, StatusError, StatusStore};
use crate::taxonomy::{IntentCatalog, PriorityBucket};

use super::record::AmbiguityLog;
use super::result::{ClassificationResult, ClassificationStatus, FallbackSource};
use super::session::SessionWindow;

/// Maximum accepted query length in characters.
const MAX_QUERY_CHARS: usize = 500;

/// Candidates requested from each matcher.
const TOP_N: usize = 10;

/// Minimum score for a candidate to serve as a non-generic fallback when
/// the LLM path is disabled.
const FALLBACK_MIN_CONFIDENCE: f64 = 0.3;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Queue error: {0}")]
    QueueError(#[from] QueueError),

    #[error("Status error: {0}")]
    StatusError(#[from] StatusError),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Outcome of one request: an immediate answer or an async escalation.
#[derive(Debug, Clone)]
pub enum EngineOutcome {
    /// Answered synchronously.
    Classified(ClassificationResult),
    /// Escalated; poll the status endpoint with this id.
    Queued { request_id: String },
}

/// The classification pipeline orchestrator.
pub struct DecisionEngine {
    catalog: Arc<IntentCatalog>,
    keyword: Arc<KeywordMatcher>,
    embeddings: Arc<EmbeddingMatcher>,
    config: Arc<ConfigManager>,
    cache: Arc<ResponseCache>,
    queue: Arc<EscalationQueue>,
    status: Arc<StatusStore>,
    fallback: Arc<FallbackManager>,
    ambiguity: Arc<AmbiguityLog>,
    sessions: Arc<SessionWindow>,
    extractor: EntityExtractor,
}

impl DecisionEngine {
    /// Create an engine over the shared components.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<IntentCatalog>,
        keyword: Arc<KeywordMatcher>,
        embeddings: Arc<EmbeddingMatcher>,
        config: Arc<ConfigManager>,
        cache: Arc<ResponseCache>,
        queue: Arc<EscalationQueue>,
        status: Arc<StatusStore>,
        fallback: Arc<FallbackManager>,
        ambiguity: Arc<AmbiguityLog>,
        sessions: Arc<SessionWindow>,
    ) -> Self {
        Self {
            catalog,
            keyword,
            embeddings,
            config,
            cache,
            queue,
            status,
            fallback,
            ambiguity,
            sessions,
            extractor: EntityExtractor::new(),
        }
    }

    /// Classify one utterance.
    pub async fn classify(
        &self,
        text: &str,
        session_id: Option<&str>,
    ) -> EngineResult<EngineOutcome> {
        let query = text.trim();
        if query.is_empty() {
            return Err(EngineError::InvalidInput("query is empty".to_string()));
        }
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(EngineError::InvalidInput(format!(
                "query exceeds {MAX_QUERY_CHARS} characters"
            )));
        }

        // One variant snapshot per request; a mid-flight swap never mixes.
        let variant = self.config.active();

        let keyword_candidates = self.keyword.search(query, TOP_N);

        // Priority short-circuit: a strong keyword hit answers without any
        // embedding work.
        if let Some(top) = keyword_candidates.first() {
            if top.score >= variant.priority_threshold {
                let result = self.keyword_result(query, top, &keyword_candidates);
                self.remember(session_id, query);
                return Ok(EngineOutcome::Classified(result));
            }
        }

        let embedding_active = variant.use_embedding && self.embeddings.is_healthy();
        let (embedding_candidates, weights) = if embedding_active {
            let candidates = self.embeddings.search(query, TOP_N);
            // A failed lazy initialization surfaces as an empty result; fall
            // back to keyword-only weights for this request.
            if candidates.is_empty() && !self.embeddings.is_healthy() {
                (Vec::new(), BlendWeights::keyword_only())
            } else {
                (
                    candidates,
                    BlendWeights {
                        keyword: variant.kw_weight,
                        embedding: variant.emb_weight,
                    },
                )
            }
        } else {
            (Vec::new(), BlendWeights::keyword_only())
        };

        let blended = blend(&keyword_candidates, &embedding_candidates, weights);
        let gate = evaluate_gate(&blended, variant.confidence_threshold, variant.gap_threshold);

        match gate {
            GateDecision::Confident => {
                let top = blended.first().expect("confident gate implies a candidate");
                let result = self.blended_result(query, top);
                self.remember(session_id, query);
                Ok(EngineOutcome::Classified(result))
            }
            GateDecision::Ambiguous | GateDecision::Unclear => {
                let outcome_tag = match gate {
                    GateDecision::Ambiguous => "AMBIGUOUS",
                    _ => "UNCLEAR",
                };
                self.ambiguity.record(outcome_tag, query, &blended);

                // Exact then semantic cache before paying for the LLM. The
                // semantic tier needs a query vector, so it only runs when
                // the embedding stage is active for this request.
                let embedding = if embedding_active {
                    self.embeddings.embed(query)
                } else {
                    None
                };
                let embedding_slice = embedding.as_deref().map(|v| v.as_slice());
                if let Some(cached) = self.cache.get(query, embedding_slice).await {
                    debug!(query, "answered from response cache");
                    self.remember(session_id, query);
                    return Ok(EngineOutcome::Classified(cached));
                }

                if !variant.use_llm {
                    let result = self.no_llm_fallback(query, gate, &blended);
                    self.remember(session_id, query);
                    return Ok(EngineOutcome::Classified(result));
                }

                let request_id = self
                    .enqueue(query, session_id, gate, &blended, &variant)
                    .await?;
                self.remember(session_id, query);
                Ok(EngineOutcome::Queued { request_id })
            }
        }
    }

    fn keyword_result(
        &self,
        query: &str,
        top: &Candidate,
        all: &[Candidate],
    ) -> ClassificationResult {
        let matched: Vec<String> = all
            .iter()
            .filter(|c| c.code == top.code)
            .filter_map(|c| c.matched_text.clone())
            .collect();
        info!(code = %top.code, score = top.score, "confident keyword classification");
        ClassificationResult::new(
            top.code.clone(),
            top.score,
            ClassificationStatus::ConfidentKeyword,
            MatchSource::Keyword,
        )
        .with_matched_keywords(matched)
        .with_entities(self.extractor.extract(query))
    }

    fn blended_result(&self, query: &str, top: &Candidate) -> ClassificationResult {
        info!(code = %top.code, score = top.score, "confident blended classification");
        ClassificationResult::new(
            top.code.clone(),
            top.score,
            ClassificationStatus::ConfidentBlended,
            MatchSource::Blended,
        )
        .with_matched_keywords(top.matched_text.clone().into_iter().collect())
        .with_entities(self.extractor.extract(query))
    }

    /// Fallback ladder when the LLM path is disabled: an ambiguous ranking
    /// still has a usable head; an unclear one falls to the generic search.
    fn no_llm_fallback(
        &self,
        query: &str,
        gate: GateDecision,
        blended: &[Candidate],
    ) -> ClassificationResult {
        if gate == GateDecision::Ambiguous {
            if let Some(top) = blended.first() {
                if top.score >= FALLBACK_MIN_CONFIDENCE {
                    let components = top.component_scores.unwrap_or_default();
                    let (status, source) = if components.keyword >= components.embedding {
                        (ClassificationStatus::FallbackKeyword, FallbackSource::Keyword)
                    } else {
                        (
                            ClassificationStatus::FallbackEmbedding,
                            FallbackSource::Embedding,
                        )
                    };
                    return ClassificationResult::new(
                        top.code.clone(),
                        top.score,
                        status,
                        MatchSource::Fallback,
                    )
                    .with_matched_keywords(top.matched_text.clone().into_iter().collect())
                    .with_entities(self.extractor.extract(query))
                    .with_fallback_source(source);
                }
            }
        }
        self.fallback.generic_search()
    }

    /// Enqueue an escalation and create its QUEUED status.
    async fn enqueue(
        &self,
        query: &str,
        session_id: Option<&str>,
        gate: GateDecision,
        blended: &[Candidate],
        variant: &ConfigVariant,
    ) -> EngineResult<String> {
        let priority = self.escalation_priority(gate, blended);
        let payload = QueuePayload {
            query: query.to_string(),
            rule_based_hint: blended.first().cloned(),
            context_snapshot: session_id
                .map(|id| self.sessions.snapshot(id))
                .unwrap_or_default(),
        };
        let request_id = self.queue.enqueue(payload, priority).await?;
        self.status
            .set(RequestStatus::queued(request_id.clone()))
            .await?;
        info!(request_id = %request_id, model = %variant.llm_model, ?priority, "escalated to LLM queue");
        Ok(request_id)
    }

    /// Escalation priority from the top candidate's intent bucket; unclear
    /// rankings take the slow lane.
    fn escalation_priority(&self, gate: GateDecision, blended: &[Candidate]) -> QueuePriority {
        if gate == GateDecision::Unclear {
            return QueuePriority::Low;
        }
        let bucket = blended
            .first()
            .and_then(|top| self.catalog.get(&top.code))
            .map(|definition| definition.priority);
        match bucket {
            Some(PriorityBucket::Critical | PriorityBucket::High) => QueuePriority::High,
            Some(PriorityBucket::Medium) => QueuePriority::Normal,
            _ => QueuePriority::Low,
        }
    }

    fn remember(&self, session_id: Option<&str>, query: &str) {
        if let Some(id) = session_id {
            self.sessions.record(id, query);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::matching::HashedNgramEncoder;
    use crate::queue::QueueConfig;
    use crate::status::DEFAULT_STATUS_TTL_SECS;
    use crate::store::{InMemoryVectorIndex, MemoryStore};
    use crate::taxonomy::{seed_catalog, seed_keywords};
    use crate::text::Normalizer;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Harness {
        engine: DecisionEngine,
        encoder_used: Arc<AtomicBool>,
        status: Arc<StatusStore>,
        queue: Arc<EscalationQueue>,
        cache: Arc<ResponseCache>,
        embeddings: Arc<EmbeddingMatcher>,
    }

    fn harness(variant: ConfigVariant) -> Harness {
        let catalog = Arc::new(seed_catalog());
        let normalizer = Arc::new(Normalizer::default());
        let keyword = Arc::new(KeywordMatcher::new(&seed_keywords(), normalizer));

        let encoder_used = Arc::new(AtomicBool::new(false));
        let used = Arc::clone(&encoder_used);
        let embeddings = Arc::new(EmbeddingMatcher::new(
            move || {
                used.store(true, Ordering::SeqCst);
                Ok(Arc::new(HashedNgramEncoder::default())
                    as Arc<dyn crate::matching::Encoder>)
            },
            Arc::clone(&catalog),
        ));

        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(ResponseCache::new(
            CacheConfig::default(),
            store.clone(),
            Arc::new(InMemoryVectorIndex::new()),
        ));
        let queue = Arc::new(EscalationQueue::new(QueueConfig::default(), store.clone()));
        let status = Arc::new(StatusStore::new(store, "test", DEFAULT_STATUS_TTL_SECS));
        let fallback = Arc::new(FallbackManager::new(Arc::clone(&cache)));
        let config = Arc::new(ConfigManager::with_variant(variant).unwrap());

        let engine = DecisionEngine::new(
            catalog,
            keyword,
            Arc::clone(&embeddings),
            config,
            Arc::clone(&cache),
            Arc::clone(&queue),
            Arc::clone(&status),
            fallback,
            Arc::new(AmbiguityLog::new(None)),
            Arc::new(SessionWindow::new()),
        );
        Harness {
            engine,
            encoder_used,
            status,
            queue,
            cache,
            embeddings,
        }
    }

    #[tokio::test]
    async fn test_keyword_short_circuit_skips_embedding() {
        let h = harness(ConfigVariant::baseline());
        let outcome = h.engine.classify("add to cart", None).await.unwrap();

        let EngineOutcome::Classified(result) = outcome else {
            panic!("expected a synchronous answer");
        };
        assert_eq!(result.status, ClassificationStatus::ConfidentKeyword);
        assert_eq!(result.action_code.as_str(), "ADD_TO_CART");
        assert!(result.confidence >= 0.95);
        assert!(result
            .matched_keywords
            .iter()
            .any(|k| k == "add to cart"));
        // The short-circuit fired before any embedding work.
        assert!(!h.encoder_used.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let h = harness(ConfigVariant::baseline());
        let error = h.engine.classify("   ", None).await.unwrap_err();
        assert!(matches!(error, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_oversized_input_rejected() {
        let h = harness(ConfigVariant::baseline());
        let long = "word ".repeat(200);
        let error = h.engine.classify(&long, None).await.unwrap_err();
        assert!(matches!(error, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_ambiguous_query_enqueues_with_status() {
        let h = harness(ConfigVariant::baseline());
        let outcome = h
            .engine
            .classify("add shoes and track my order", None)
            .await
            .unwrap();

        let EngineOutcome::Queued { request_id } = outcome else {
            panic!("expected an escalation");
        };
        let status = h.status.get(&request_id).await.unwrap().unwrap();
        assert_eq!(status.state, crate::status::RequestState::Queued);

        let stats = h.queue.stats().await;
        assert_eq!(stats.ready, 1);
    }

    #[tokio::test]
    async fn test_cache_hit_preempts_enqueue() {
        let h = harness(ConfigVariant::baseline());
        let query = "add shoes and track my order";

        let cached = ClassificationResult::new(
            crate::taxonomy::ActionCode::from("SEARCH_PRODUCT"),
            0.9,
            ClassificationStatus::LlmClassification,
            MatchSource::Fallback,
        );
        let embedding = h.embeddings.embed(query).unwrap();
        h.cache.set(query, Some(&embedding), &cached).await;

        let outcome = h.engine.classify(query, None).await.unwrap();
        let EngineOutcome::Classified(result) = outcome else {
            panic!("expected the cached answer");
        };
        assert_eq!(result.status, ClassificationStatus::LlmClassification);
        assert_eq!(h.queue.stats().await.ready, 0);
    }

    #[tokio::test]
    async fn test_llm_disabled_falls_back() {
        let variant = ConfigVariant {
            use_llm: false,
            ..ConfigVariant::baseline()
        };
        let h = harness(variant);
        // Ambiguous two-intent query with the LLM off.
        let outcome = h
            .engine
            .classify("add shoes and track my order", None)
            .await
            .unwrap();
        let EngineOutcome::Classified(result) = outcome else {
            panic!("expected a fallback answer");
        };
        assert!(matches!(
            result.status,
            ClassificationStatus::FallbackKeyword
                | ClassificationStatus::FallbackEmbedding
                | ClassificationStatus::FallbackGeneric
        ));
        assert_eq!(h.queue.stats().await.ready, 0);
    }

    #[tokio::test]
    async fn test_unclear_with_llm_disabled_is_generic() {
        let variant = ConfigVariant {
            use_llm: false,
            use_embedding: false,
            ..ConfigVariant::baseline()
        };
        let h = harness(variant);
        let outcome = h.engine.classify("zzz qqq www", None).await.unwrap();
        let EngineOutcome::Classified(result) = outcome else {
            panic!("expected generic fallback");
        };
        assert_eq!(result.status, ClassificationStatus::FallbackGeneric);
        assert_eq!(result.action_code.as_str(), "SEARCH_PRODUCT");
        assert!((result.confidence - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_embedding_disabled_renormalizes_to_keyword_only() {
        let variant = ConfigVariant {
            use_embedding: false,
            // force the gate to pass on a pure keyword score
            confidence_threshold: 0.45,
            gap_threshold: 0.05,
            priority_threshold: 0.99,
            ..ConfigVariant::baseline()
        };
        let h = harness(variant);
        let outcome = h.engine.classify("view cart", None).await.unwrap();
        let EngineOutcome::Classified(result) = outcome else {
            panic!("expected a blended answer");
        };
        // kw score 0.5 (priority 2 exact) * renormalized weight 1.0
        assert_eq!(result.status, ClassificationStatus::ConfidentBlended);
        assert_eq!(result.action_code.as_str(), "VIEW_CART");
        assert!((result.confidence - 0.5).abs() < 1e-9);
        assert!(!h.encoder_used.load(Ordering::SeqCst));
    }
}
