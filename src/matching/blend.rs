//! Hybrid blender
//!
//! Merges keyword and embedding candidates by action code into a single
//! weighted ranking. A consensus bonus rewards codes both matchers agree on;
//! a confidence bonus rewards a very strong individual signal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::taxonomy::ActionCode;

use super::{rank_candidates, Candidate, ComponentScores, MatchSource, MatchType};

/// Bonus added when both matchers produced a positive score for a code.
const CONSENSUS_BONUS: f64 = 0.05;

/// Bonus added when either component score reaches this floor.
const CONFIDENCE_BONUS: f64 = 0.03;
const CONFIDENCE_BONUS_FLOOR: f64 = 0.90;

/// Matcher weights for one request. Snapshotted from the active config
/// variant; the engine renormalizes to keyword-only when embeddings are
/// unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendWeights {
    /// Keyword component weight.
    pub keyword: f64,
    /// Embedding component weight.
    pub embedding: f64,
}

impl BlendWeights {
    /// Weights for a request where the embedding matcher cannot contribute.
    pub fn keyword_only() -> Self {
        Self {
            keyword: 1.0,
            embedding: 0.0,
        }
    }
}

struct Merged {
    keyword: f64,
    embedding: f64,
    match_type: Option<MatchType>,
    matched_text: Option<String>,
}

/// Blend keyword and embedding candidates into `source = blended` records.
///
/// When one matcher returned nothing, the other's candidates pass through
/// with the missing component recorded as zero.
pub fn blend(
    keyword_candidates: &[Candidate],
    embedding_candidates: &[Candidate],
    weights: BlendWeights,
) -> Vec<Candidate> {
    let mut merged: BTreeMap<ActionCode, Merged> = BTreeMap::new();

    for candidate in keyword_candidates {
        let entry = merged.entry(candidate.code.clone()).or_insert(Merged {
            keyword: 0.0,
            embedding: 0.0,
            match_type: None,
            matched_text: None,
        });
        if candidate.score > entry.keyword {
            entry.keyword = candidate.score;
            entry.match_type = candidate.match_type;
            entry.matched_text = candidate.matched_text.clone();
        }
    }

    for candidate in embedding_candidates {
        let entry = merged.entry(candidate.code.clone()).or_insert(Merged {
            keyword: 0.0,
            embedding: 0.0,
            match_type: None,
            matched_text: None,
        });
        entry.embedding = entry.embedding.max(candidate.score);
    }

    let mut blended: Vec<Candidate> = merged
        .into_iter()
        .map(|(code, parts)| {
            let mut score = weights.keyword * parts.keyword + weights.embedding * parts.embedding;
            if parts.keyword > 0.0 && parts.embedding > 0.0 {
                score += CONSENSUS_BONUS;
            }
            if parts.keyword.max(parts.embedding) >= CONFIDENCE_BONUS_FLOOR {
                score += CONFIDENCE_BONUS;
            }

            let mut candidate = Candidate::new(code, score, MatchSource::Blended);
            candidate.match_type = parts.match_type;
            candidate.matched_text = parts.matched_text;
            candidate.component_scores = Some(ComponentScores {
                keyword: parts.keyword,
                embedding: parts.embedding,
            });
            candidate
        })
        .collect();

    rank_candidates(&mut blended);
    blended
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(code: &str, score: f64) -> Candidate {
        Candidate::new(ActionCode::from(code), score, MatchSource::Keyword)
            .with_match_type(MatchType::Exact)
            .with_matched_text(code.to_lowercase())
    }

    fn emb(code: &str, score: f64) -> Candidate {
        Candidate::new(ActionCode::from(code), score, MatchSource::Embedding)
    }

    #[test]
    fn test_weighted_sum_with_consensus_bonus() {
        let weights = BlendWeights {
            keyword: 0.6,
            embedding: 0.4,
        };
        let blended = blend(&[kw("VIEW_CART", 0.55)], &[emb("VIEW_CART", 0.80)], weights);
        assert_eq!(blended.len(), 1);
        // 0.6*0.55 + 0.4*0.80 + 0.05 consensus = 0.88
        assert!((blended[0].score - 0.88).abs() < 1e-9);
        assert_eq!(blended[0].source, MatchSource::Blended);
    }

    #[test]
    fn test_confidence_bonus_applies_at_floor() {
        let weights = BlendWeights {
            keyword: 0.6,
            embedding: 0.4,
        };
        let blended = blend(&[kw("CHECKOUT", 0.95)], &[], weights);
        // 0.6*0.95 + 0.03 = 0.60
        assert!((blended[0].score - 0.60).abs() < 1e-9);
    }

    #[test]
    fn test_score_clamped_to_one() {
        let weights = BlendWeights {
            keyword: 0.6,
            embedding: 0.4,
        };
        let blended = blend(&[kw("CHECKOUT", 1.0)], &[emb("CHECKOUT", 1.0)], weights);
        assert_eq!(blended[0].score, 1.0);
    }

    #[test]
    fn test_pass_through_when_one_side_empty() {
        let weights = BlendWeights {
            keyword: 0.6,
            embedding: 0.4,
        };
        let blended = blend(&[], &[emb("TRACK_ORDER", 0.7)], weights);
        assert_eq!(blended.len(), 1);
        assert_eq!(blended[0].source, MatchSource::Blended);
        let components = blended[0].component_scores.unwrap();
        assert_eq!(components.keyword, 0.0);
        assert!((components.embedding - 0.7).abs() < 1e-9);
        // no consensus bonus
        assert!((blended[0].score - 0.28).abs() < 1e-9);
    }

    #[test]
    fn test_tie_broken_by_max_component_then_code() {
        let weights = BlendWeights {
            keyword: 0.6,
            embedding: 0.4,
        };
        // Same blended score 0.30; B has the stronger individual component,
        // which outranks the lexicographic code order.
        let blended = blend(&[kw("A_CODE", 0.5)], &[emb("B_CODE", 0.75)], weights);
        let a = blended.iter().position(|c| c.code.as_str() == "A_CODE").unwrap();
        let b = blended.iter().position(|c| c.code.as_str() == "B_CODE").unwrap();
        assert!(b < a);
    }

    #[test]
    fn test_keyword_only_weights() {
        let blended = blend(
            &[kw("VIEW_CART", 0.5)],
            &[],
            BlendWeights::keyword_only(),
        );
        assert!((blended[0].score - 0.5).abs() < 1e-9);
    }
}
