//! Fallback responses for LLM failures
//!
//! When the asynchronous path cannot produce an answer, the user still gets
//! a safe, non-technical response: first the response cache at its relaxed
//! threshold, then an UNCLEAR result carrying clarifying questions. Raw
//! errors never surface.

use std::sync::Arc;

use crate::cache::ResponseCache;
use crate::engine::{
    ClassificationResult, ClassificationStatus, FallbackSource,
};
use crate::matching::MatchSource;
use crate::taxonomy::ActionCode;

/// Confidence reported on generic fallbacks.
const GENERIC_FALLBACK_CONFIDENCE: f64 = 0.1;

/// Builds user-facing fallback results.
pub struct FallbackManager {
    cache: Arc<ResponseCache>,
}

impl FallbackManager {
    /// Create a manager over the response cache.
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self { cache }
    }

    /// Best-effort fallback after an LLM failure: cached semantic neighbor
    /// first, otherwise a clarification request.
    pub async fn after_llm_failure(
        &self,
        query: &str,
        embedding: Option<&[f32]>,
        retry_recommended: bool,
    ) -> ClassificationResult {
        if let Some(mut cached) = self.cache.get_fallback(query, embedding).await {
            cached.status = ClassificationStatus::LlmClassification;
            cached.fallback_source = Some(FallbackSource::Cache);
            cached.retry_recommended = Some(false);
            return cached;
        }
        self.clarification(query, retry_recommended)
    }

    /// UNCLEAR result asking the user to narrow the request.
    pub fn clarification(&self, query: &str, retry_recommended: bool) -> ClassificationResult {
        let mut result = ClassificationResult::new(
            ActionCode::from("UNCLEAR"),
            0.0,
            ClassificationStatus::Unclear,
            MatchSource::Fallback,
        );
        result.fallback_source = Some(FallbackSource::Generic);
        result.requires_clarification = Some(true);
        result.clarifying_questions = Some(clarifying_questions(query));
        result.retry_recommended = Some(retry_recommended);
        result
    }

    /// Generic search fallback used when the LLM path is disabled.
    pub fn generic_search(&self) -> ClassificationResult {
        let mut result = ClassificationResult::new(
            ActionCode::from("SEARCH_PRODUCT"),
            GENERIC_FALLBACK_CONFIDENCE,
            ClassificationStatus::FallbackGeneric,
            MatchSource::Fallback,
        );
        result.fallback_source = Some(FallbackSource::Generic);
        result.retry_recommended = Some(true);
        result
    }
}

/// Two to four domain questions tailored to what the query hints at.
fn clarifying_questions(query: &str) -> Vec<String> {
    let lower = query.to_lowercase();
    let mut questions = Vec::with_capacity(4);

    if lower.contains("order") || lower.contains("package") || lower.contains("delivery") {
        questions.push("Are you asking about an order you already placed?".to_string());
    }
    if lower.contains("cart") || lower.contains("basket") {
        questions.push("Would you like to view or change your cart?".to_string());
    }
    if lower.contains("return") || lower.contains("refund") {
        questions.push("Do you want to return an item or check a refund?".to_string());
    }

    questions.push("Are you looking for a specific product?".to_string());
    if questions.len() < 3 {
        questions.push("Could you describe what you'd like to do in a few words?".to_string());
    }
    questions.truncate(4);
    questions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::store::{InMemoryVectorIndex, MemoryStore};

    fn manager() -> FallbackManager {
        FallbackManager::new(Arc::new(ResponseCache::new(
            CacheConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(InMemoryVectorIndex::new()),
        )))
    }

    #[tokio::test]
    async fn test_clarification_has_two_to_four_questions() {
        let manager = manager();
        for query in ["where is it", "my order and my cart and a refund", "xyz"] {
            let result = manager.clarification(query, true);
            let questions = result.clarifying_questions.unwrap();
            assert!((2..=4).contains(&questions.len()), "{query}");
            assert_eq!(result.requires_clarification, Some(true));
            assert_eq!(result.status, ClassificationStatus::Unclear);
        }
    }

    #[tokio::test]
    async fn test_cache_fallback_preferred() {
        let manager = manager();
        let cached = ClassificationResult::new(
            ActionCode::from("SEARCH_PRODUCT"),
            0.92,
            ClassificationStatus::LlmClassification,
            MatchSource::Fallback,
        );
        let embedding = vec![1.0f32, 0.0];
        manager
            .cache
            .set("find red shoes", Some(&embedding), &cached)
            .await;

        let near = vec![0.95f32, 0.312];
        let result = manager
            .after_llm_failure("red shoes please", Some(&near), false)
            .await;
        assert_eq!(result.fallback_source, Some(FallbackSource::Cache));
        assert_eq!(result.action_code.as_str(), "SEARCH_PRODUCT");
    }

    #[tokio::test]
    async fn test_generic_search_fallback() {
        let result = manager().generic_search();
        assert_eq!(result.action_code.as_str(), "SEARCH_PRODUCT");
        assert!((result.confidence - 0.1).abs() < 1e-9);
        assert_eq!(result.status, ClassificationStatus::FallbackGeneric);
    }
}
