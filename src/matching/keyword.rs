//! Keyword matcher
//!
//! Matches normalized query segments against the loaded keyword dictionaries.
//! Patterns are classified at load time as literals (pre-normalized and
//! pre-tokenized) or regular expressions (compiled once, case-insensitive).
//! Scores are scaled by the entry's file-local priority: 1 is the strongest,
//! 9 the weakest.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::RegexBuilder;
use tracing::warn;

use crate::taxonomy::{ActionCode, KeywordEntry};
use crate::text::{normalize_text, Normalizer};

use super::{rank_candidates, Candidate, MatchSource, MatchType};

/// Regex metacharacters that mark a pattern as a regular expression rather
/// than a literal phrase.
const REGEX_MARKERS: [&str; 2] = [r"\b", ".*"];
const REGEX_METACHARS: [char; 10] = ['[', ']', '(', ')', '|', '^', '$', '?', '*', '+'];

#[derive(Debug)]
enum CompiledPattern {
    Literal {
        normalized: String,
        tokens: Vec<String>,
        raw: String,
    },
    Regex {
        regex: regex::Regex,
        raw: String,
        raw_len: usize,
    },
}

#[derive(Debug)]
struct CompiledEntry {
    code: ActionCode,
    priority: u8,
    patterns: Vec<CompiledPattern>,
}

struct SegmentView<'a> {
    text: &'a str,
    tokens: Vec<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BestMatch {
    score: f64,
    match_type: MatchType,
}

/// Keyword matcher over the loaded dictionaries.
pub struct KeywordMatcher {
    entries: Vec<CompiledEntry>,
    normalizer: Arc<Normalizer>,
    pattern_count: usize,
}

impl KeywordMatcher {
    /// Compile the keyword dictionaries. Regex compilation failures drop the
    /// pattern with a warning instead of failing the load.
    pub fn new(
        dictionaries: &BTreeMap<ActionCode, KeywordEntry>,
        normalizer: Arc<Normalizer>,
    ) -> Self {
        let mut entries = Vec::with_capacity(dictionaries.len());
        let mut pattern_count = 0;

        for (code, entry) in dictionaries {
            let mut patterns = Vec::with_capacity(entry.keywords.len());
            for raw in &entry.keywords {
                match compile_pattern(raw) {
                    Some(pattern) => {
                        pattern_count += 1;
                        patterns.push(pattern);
                    }
                    None => {
                        warn!(code = %code, pattern = %raw, "invalid regex pattern dropped");
                    }
                }
            }
            if !patterns.is_empty() {
                entries.push(CompiledEntry {
                    code: code.clone(),
                    priority: entry.priority,
                    patterns,
                });
            }
        }

        Self {
            entries,
            normalizer,
            pattern_count,
        }
    }

    /// Number of compiled patterns across all entries.
    pub fn pattern_count(&self) -> usize {
        self.pattern_count
    }

    /// Match `query` against every dictionary entry and return the top-N
    /// candidates, scored in [0, 1] with `source = keyword`.
    pub fn search(&self, query: &str, top_n: usize) -> Vec<Candidate> {
        let normalized = self.normalizer.normalize(query);
        if normalized.is_empty() || top_n == 0 {
            return Vec::new();
        }

        let segments: Vec<SegmentView<'_>> = normalized
            .segments
            .iter()
            .map(|s| SegmentView {
                text: s.as_str(),
                tokens: s.split_whitespace().collect(),
            })
            .collect();

        let mut candidates = Vec::new();
        for entry in &self.entries {
            if let Some((best, matched_text)) = score_entry(entry, &segments) {
                candidates.push(
                    Candidate::new(entry.code.clone(), best.score, MatchSource::Keyword)
                        .with_match_type(best.match_type)
                        .with_matched_text(matched_text),
                );
            }
        }

        rank_candidates(&mut candidates);
        candidates.truncate(top_n);
        candidates
    }
}

/// Aggregate per action code across segments and patterns, keeping the
/// maximum score and the text that produced it.
fn score_entry(entry: &CompiledEntry, segments: &[SegmentView<'_>]) -> Option<(BestMatch, String)> {
    let priority = f64::from(entry.priority);
    let mut best: Option<(BestMatch, String)> = None;

    for pattern in &entry.patterns {
        // Partial credit applies only when the pattern had no exact or regex
        // hit in any segment.
        let mut pattern_best: Option<(BestMatch, String)> = None;
        let mut pattern_partial: Option<(BestMatch, String)> = None;

        for segment in segments {
            match pattern {
                CompiledPattern::Literal {
                    normalized,
                    tokens,
                    raw,
                } => {
                    if segment.text == normalized {
                        consider(
                            &mut pattern_best,
                            BestMatch {
                                score: 1.0 / priority,
                                match_type: MatchType::Exact,
                            },
                            raw.clone(),
                        );
                    } else {
                        let overlap = tokens
                            .iter()
                            .filter(|t| segment.tokens.contains(&t.as_str()))
                            .count();
                        if overlap > 0 {
                            let score = (overlap as f64 / tokens.len() as f64) / priority;
                            consider(
                                &mut pattern_partial,
                                BestMatch {
                                    score,
                                    match_type: MatchType::Partial,
                                },
                                raw.clone(),
                            );
                        }
                    }
                }
                CompiledPattern::Regex {
                    regex,
                    raw,
                    raw_len,
                } => {
                    if let Some(found) = regex.find(segment.text) {
                        let coverage = (found.len() as f64 / *raw_len as f64).min(1.0);
                        consider(
                            &mut pattern_best,
                            BestMatch {
                                score: coverage / priority,
                                match_type: MatchType::Regex,
                            },
                            found.as_str().to_string(),
                        );
                    }
                }
            }
        }

        let winner = pattern_best.or(pattern_partial);
        if let Some((candidate, text)) = winner {
            consider(&mut best, candidate, text);
        }
    }

    best
}

fn consider(slot: &mut Option<(BestMatch, String)>, candidate: BestMatch, text: String) {
    let replace = match slot {
        None => true,
        Some((current, _)) => {
            candidate.score > current.score
                || (candidate.score == current.score && candidate.match_type > current.match_type)
        }
    };
    if replace {
        *slot = Some((candidate, text));
    }
}

fn compile_pattern(raw: &str) -> Option<CompiledPattern> {
    if is_regex_pattern(raw) {
        let regex = RegexBuilder::new(raw)
            .case_insensitive(true)
            .build()
            .ok()?;
        Some(CompiledPattern::Regex {
            regex,
            raw: raw.to_string(),
            raw_len: raw.chars().count().max(1),
        })
    } else {
        let normalized = normalize_text(raw);
        Some(CompiledPattern::Literal {
            tokens: normalized.tokens.clone(),
            normalized: normalized.normalized,
            raw: raw.to_string(),
        })
    }
}

fn is_regex_pattern(raw: &str) -> bool {
    REGEX_MARKERS.iter().any(|m| raw.contains(m))
        || raw.chars().any(|c| REGEX_METACHARS.contains(&c))
        || raw.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::seed_keywords;

    fn matcher() -> KeywordMatcher {
        KeywordMatcher::new(&seed_keywords(), Arc::new(Normalizer::default()))
    }

    #[test]
    fn test_exact_match_scores_full_priority() {
        let results = matcher().search("add to cart", 5);
        assert_eq!(results[0].code.as_str(), "ADD_TO_CART");
        assert_eq!(results[0].match_type, Some(MatchType::Exact));
        // priority 1 exact match
        assert!((results[0].score - 1.0).abs() < 1e-9);
        assert_eq!(results[0].matched_text.as_deref(), Some("add to cart"));
    }

    #[test]
    fn test_regex_match() {
        let mut dict = BTreeMap::new();
        dict.insert(
            ActionCode::from("CANCEL_ORDER"),
            KeywordEntry {
                priority: 1,
                keywords: vec![r"\bcancel\b.*\border\b".into()],
            },
        );
        let matcher = KeywordMatcher::new(&dict, Arc::new(Normalizer::default()));

        let results = matcher.search("please cancel that order for me", 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].match_type, Some(MatchType::Regex));
        assert_eq!(results[0].matched_text.as_deref(), Some("cancel that order"));
        // coverage of the matched span over the pattern length
        assert!(results[0].score > 0.5 && results[0].score < 1.0);
    }

    #[test]
    fn test_regex_coverage_denominator_is_raw_pattern_length() {
        // Coverage divides the matched span by the pattern's raw length,
        // syntax characters included, then caps at 1.0. Two regexes hitting
        // the same span therefore rank by how lean their notation is.
        let mut dict = BTreeMap::new();
        dict.insert(
            ActionCode::from("LEAN"),
            KeywordEntry {
                priority: 1,
                keywords: vec![r"cancel.*order".into()],
            },
        );
        dict.insert(
            ActionCode::from("DECORATED"),
            KeywordEntry {
                priority: 1,
                keywords: vec![r"\bcancel\b.*\border\b".into()],
            },
        );
        let matcher = KeywordMatcher::new(&dict, Arc::new(Normalizer::default()));

        let results = matcher.search("please cancel my order", 5);
        assert_eq!(results.len(), 2);
        let lean = results.iter().find(|c| c.code.as_str() == "LEAN").unwrap();
        let decorated = results
            .iter()
            .find(|c| c.code.as_str() == "DECORATED")
            .unwrap();

        // Both match "cancel my order" (15 chars). The 13-char lean pattern
        // caps at 1.0; the 21-char decorated one scores 15/21.
        assert!((lean.score - 1.0).abs() < 1e-9);
        assert!((decorated.score - 15.0 / 21.0).abs() < 1e-9);
        assert_eq!(results[0].code.as_str(), "LEAN");
    }

    #[test]
    fn test_full_token_overlap_scores_like_exact_but_ranks_below() {
        // "cancel order" fully overlaps the tokens of a longer segment; the
        // partial score equals the exact score for that priority, and only
        // the match-type rank separates them.
        let results = matcher().search("please cancel that order for me", 5);
        let cancel = results
            .iter()
            .find(|c| c.code.as_str() == "CANCEL_ORDER")
            .expect("overlap candidate");
        assert_eq!(cancel.match_type, Some(MatchType::Partial));
        assert!((cancel.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_match_uses_token_overlap() {
        let results = matcher().search("cart please", 10);
        let view = results
            .iter()
            .find(|c| c.code.as_str() == "VIEW_CART")
            .expect("partial candidate");
        assert_eq!(view.match_type, Some(MatchType::Partial));
        // "my cart" has 2 tokens, 1 overlaps, priority 2 -> 0.25
        assert!((view.score - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_segments_are_matched_independently() {
        let results = matcher().search("add to cart and track my order", 5);
        let codes: Vec<&str> = results.iter().map(|c| c.code.as_str()).collect();
        assert!(codes.contains(&"ADD_TO_CART"));
        assert!(codes.contains(&"TRACK_ORDER"));
        // both segments match exactly despite neither matching the full query
        assert_eq!(results[0].match_type, Some(MatchType::Exact));
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        assert!(matcher().search("", 5).is_empty());
        assert!(matcher().search("  !?  ", 5).is_empty());
    }

    #[test]
    fn test_top_n_truncation() {
        let results = matcher().search("add cart order return support", 2);
        assert!(results.len() <= 2);
    }

    #[test]
    fn test_scores_within_bounds() {
        for query in ["add to cart", "find shoes and cancel order", "xyzzy"] {
            for candidate in matcher().search(query, 10) {
                assert!((0.0..=1.0).contains(&candidate.score), "{query}");
            }
        }
    }

    #[test]
    fn test_invalid_regex_is_dropped() {
        let mut dict = BTreeMap::new();
        dict.insert(
            ActionCode::from("CHECKOUT"),
            KeywordEntry {
                priority: 1,
                keywords: vec!["checkout".into(), r"\b(unclosed".into()],
            },
        );
        let matcher = KeywordMatcher::new(&dict, Arc::new(Normalizer::default()));
        assert_eq!(matcher.pattern_count(), 1);
        assert!(!matcher.search("checkout", 1).is_empty());
    }

    #[test]
    fn test_literal_classification() {
        assert!(!is_regex_pattern("add to cart"));
        assert!(is_regex_pattern(r"\badd\b.*\bcart\b"));
        assert!(is_regex_pattern("colou?r"));
    }
}
