//! Hybrid matching pipeline
//!
//! This module provides:
//! - The `Candidate` scoring record shared by all matchers
//! - Keyword matching against loaded dictionaries (exact/regex/partial)
//! - Embedding matching against precomputed reference vectors
//! - Weighted blending with consensus and confidence bonuses
//! - The two-value confidence gate (absolute threshold + top-1/top-2 gap)

mod blend;
mod embedding;
mod gate;
mod keyword;

pub use blend::{blend, BlendWeights};
pub use embedding::{
    EmbeddingMatcher, Encoder, EncoderError, HashedNgramEncoder, DEFAULT_DIMENSION,
};
pub use gate::{evaluate_gate, GateDecision};
pub use keyword::KeywordMatcher;

use serde::{Deserialize, Serialize};

use crate::taxonomy::ActionCode;

/// Which stage produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Keyword,
    Embedding,
    Blended,
    Fallback,
}

/// How a keyword pattern matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Token-overlap match.
    Partial,
    /// Regex match inside a segment.
    Regex,
    /// Segment equals the normalized pattern.
    Exact,
}

/// Per-matcher component scores carried through blending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    /// Keyword matcher contribution, 0 when the matcher had no candidate.
    pub keyword: f64,
    /// Embedding matcher contribution, 0 when the matcher had no candidate.
    pub embedding: f64,
}

/// An intermediate scoring record produced by a matcher stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// The proposed action code.
    pub code: ActionCode,
    /// Score in [0, 1].
    pub score: f64,
    /// Producing stage.
    pub source: MatchSource,
    /// Keyword match type, when `source` involves the keyword matcher.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
    /// Text that produced the best score.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_text: Option<String>,
    /// Component breakdown, present on blended candidates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_scores: Option<ComponentScores>,
}

impl Candidate {
    /// Create a candidate with a clamped score.
    pub fn new(code: ActionCode, score: f64, source: MatchSource) -> Self {
        Self {
            code,
            score: score.clamp(0.0, 1.0),
            source,
            match_type: None,
            matched_text: None,
            component_scores: None,
        }
    }

    /// Attach the keyword match type.
    pub fn with_match_type(mut self, match_type: MatchType) -> Self {
        self.match_type = Some(match_type);
        self
    }

    /// Attach the matched text.
    pub fn with_matched_text(mut self, text: impl Into<String>) -> Self {
        self.matched_text = Some(text.into());
        self
    }

    /// Largest individual component score, used as a blend tie-breaker.
    pub fn max_component(&self) -> f64 {
        self.component_scores
            .map(|c| c.keyword.max(c.embedding))
            .unwrap_or(self.score)
    }
}

/// Rank candidates deterministically: score descending, then match-type rank,
/// then largest individual component, then code ascending. Map iteration
/// order never leaks into results.
pub fn rank_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.match_type.cmp(&a.match_type))
            .then_with(|| {
                b.max_component()
                    .partial_cmp(&a.max_component())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.code.cmp(&b.code))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_is_clamped() {
        let c = Candidate::new(ActionCode::from("A"), 1.4, MatchSource::Blended);
        assert_eq!(c.score, 1.0);
        let c = Candidate::new(ActionCode::from("A"), -0.2, MatchSource::Blended);
        assert_eq!(c.score, 0.0);
    }

    #[test]
    fn test_match_type_ranking() {
        assert!(MatchType::Exact > MatchType::Regex);
        assert!(MatchType::Regex > MatchType::Partial);
    }

    #[test]
    fn test_rank_breaks_ties_by_code() {
        let mut candidates = vec![
            Candidate::new(ActionCode::from("VIEW_CART"), 0.5, MatchSource::Keyword),
            Candidate::new(ActionCode::from("ADD_TO_CART"), 0.5, MatchSource::Keyword),
        ];
        rank_candidates(&mut candidates);
        assert_eq!(candidates[0].code.as_str(), "ADD_TO_CART");
    }

    #[test]
    fn test_rank_prefers_stronger_match_type() {
        let mut candidates = vec![
            Candidate::new(ActionCode::from("B"), 0.5, MatchSource::Keyword)
                .with_match_type(MatchType::Partial),
            Candidate::new(ActionCode::from("A"), 0.5, MatchSource::Keyword)
                .with_match_type(MatchType::Exact),
        ];
        rank_candidates(&mut candidates);
        assert_eq!(candidates[0].code.as_str(), "A");
    }
}
