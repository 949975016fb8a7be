//! Confidence gate
//!
//! Decides whether a blended ranking is trustworthy enough to answer
//! directly. Two values drive the decision: the absolute confidence
//! threshold and the required gap between the top two candidates.

use serde::{Deserialize, Serialize};

use super::Candidate;

/// Gate outcome for one blended ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateDecision {
    /// Top candidate clears the threshold with a sufficient gap.
    Confident,
    /// Strong signal, but more than one plausible winner.
    Ambiguous,
    /// No candidate clears the threshold.
    Unclear,
}

/// Evaluate the gate over a ranking sorted descending by score.
pub fn evaluate_gate(
    candidates: &[Candidate],
    confidence_threshold: f64,
    gap_threshold: f64,
) -> GateDecision {
    let Some(top) = candidates.first() else {
        return GateDecision::Unclear;
    };

    if top.score < confidence_threshold {
        return GateDecision::Unclear;
    }

    match candidates.get(1) {
        None => GateDecision::Confident,
        Some(second) => {
            let gap = top.score - second.score;
            if second.score >= confidence_threshold || gap < gap_threshold {
                GateDecision::Ambiguous
            } else {
                GateDecision::Confident
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::MatchSource;
    use crate::taxonomy::ActionCode;

    fn ranking(scores: &[f64]) -> Vec<Candidate> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| {
                Candidate::new(ActionCode::new(format!("CODE_{i}")), *s, MatchSource::Blended)
            })
            .collect()
    }

    #[test]
    fn test_confident_with_clear_gap() {
        let decision = evaluate_gate(&ranking(&[0.9, 0.4]), 0.6, 0.15);
        assert_eq!(decision, GateDecision::Confident);
    }

    #[test]
    fn test_ambiguous_when_gap_too_small() {
        let decision = evaluate_gate(&ranking(&[0.7, 0.62]), 0.6, 0.15);
        assert_eq!(decision, GateDecision::Ambiguous);
    }

    #[test]
    fn test_ambiguous_when_two_above_threshold() {
        // Gap alone would pass, but both clear the absolute threshold.
        let decision = evaluate_gate(&ranking(&[0.95, 0.65]), 0.6, 0.15);
        assert_eq!(decision, GateDecision::Ambiguous);
    }

    #[test]
    fn test_unclear_below_threshold() {
        let decision = evaluate_gate(&ranking(&[0.5]), 0.6, 0.15);
        assert_eq!(decision, GateDecision::Unclear);
    }

    #[test]
    fn test_empty_ranking_is_unclear() {
        let decision = evaluate_gate(&[], 0.6, 0.15);
        assert_eq!(decision, GateDecision::Unclear);
    }

    #[test]
    fn test_single_candidate_above_threshold() {
        let decision = evaluate_gate(&ranking(&[0.75]), 0.6, 0.15);
        assert_eq!(decision, GateDecision::Confident);
    }
}
