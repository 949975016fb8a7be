//! Classification results

use serde::{Deserialize, Serialize};

use crate::entities::Entities;
use crate::matching::MatchSource;
use crate::taxonomy::ActionCode;

/// Outcome status of one classification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationStatus {
    /// A keyword candidate cleared the priority short-circuit.
    ConfidentKeyword,
    /// The blended ranking cleared the confidence gate.
    ConfidentBlended,
    /// Escalated to the asynchronous LLM path.
    QueuedForLlm,
    /// Answered by the LLM (directly or from the response cache).
    LlmClassification,
    /// LLM unavailable; best embedding candidate returned instead.
    FallbackEmbedding,
    /// LLM unavailable; best keyword candidate returned instead.
    FallbackKeyword,
    /// No usable signal; generic search fallback.
    FallbackGeneric,
    /// No candidate met the confidence threshold.
    Unclear,
    /// Rejected input (empty or oversized).
    ErrorInvalidInput,
    /// Internal failure translated to a safe response.
    ErrorInternal,
}

/// Where a fallback result was sourced from when the LLM failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackSource {
    Cache,
    Keyword,
    Embedding,
    Generic,
}

/// Final output of the classification pipeline for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Chosen action code.
    pub action_code: ActionCode,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Outcome status.
    pub status: ClassificationStatus,
    /// Keyword patterns that contributed to the decision.
    #[serde(default)]
    pub matched_keywords: Vec<String>,
    /// Extracted entities, when any field is present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<Entities>,
    /// Producing stage.
    pub source: MatchSource,
    /// Request id, present on asynchronous escalations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Where a fallback was sourced, when the LLM path failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_source: Option<FallbackSource>,
    /// Set when the caller should re-ask the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_clarification: Option<bool>,
    /// Clarifying questions for UNCLEAR fallbacks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarifying_questions: Option<Vec<String>>,
    /// Whether retrying the same query is likely to help.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_recommended: Option<bool>,
}

impl ClassificationResult {
    /// Create a result with the common fields set.
    pub fn new(
        action_code: ActionCode,
        confidence: f64,
        status: ClassificationStatus,
        source: MatchSource,
    ) -> Self {
        Self {
            action_code,
            confidence: confidence.clamp(0.0, 1.0),
            status,
            matched_keywords: Vec::new(),
            entities: None,
            source,
            request_id: None,
            fallback_source: None,
            requires_clarification: None,
            clarifying_questions: None,
            retry_recommended: None,
        }
    }

    /// Attach matched keyword texts.
    pub fn with_matched_keywords(mut self, keywords: Vec<String>) -> Self {
        self.matched_keywords = keywords;
        self
    }

    /// Attach extracted entities.
    pub fn with_entities(mut self, entities: Option<Entities>) -> Self {
        self.entities = entities;
        self
    }

    /// Attach the fallback source marker.
    pub fn with_fallback_source(mut self, source: FallbackSource) -> Self {
        self.fallback_source = Some(source);
        self
    }
}
