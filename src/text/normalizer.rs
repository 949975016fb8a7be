//! Utterance normalization
//!
//! Every matcher in the pipeline consumes the same canonical form produced
//! here. Normalization is pure: the same input always yields bitwise
//! identical output, and normalizing an already-normalized string is a
//! no-op. A bounded LRU memo in front of the pure function amortizes repeat
//! work on the request path.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

/// Default capacity for the normalization memo.
pub const DEFAULT_MEMO_CAPACITY: usize = 256;

/// Punctuation that both terminates a clause and is stripped from the
/// normalized string. Clause boundaries become segment boundaries.
const CLAUSE_PUNCTUATION: [char; 6] = ['!', '?', '.', ',', ';', ':'];

/// Punctuation stripped without introducing a segment boundary.
const SILENT_PUNCTUATION: [char; 2] = ['\'', '"'];

/// Internal marker for a clause boundary, removed before output.
const SEGMENT_MARK: char = '\u{1F}';

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("token regex"));

/// Canonical form of one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    /// Whitespace-collapsed, lowercased, punctuation-free string.
    pub normalized: String,
    /// Maximal `\w` runs of the normalized string, in order.
    pub tokens: Vec<String>,
    /// Clause segments: split on the word "and" and on original clause
    /// punctuation. Empty segments are discarded.
    pub segments: Vec<String>,
}

impl NormalizedText {
    /// True when nothing survived normalization.
    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }
}

/// Normalize an utterance without consulting any memo.
pub fn normalize_text(text: &str) -> NormalizedText {
    let marked = mark(text);

    let normalized = collapse(&marked.replace(SEGMENT_MARK, " "));

    let tokens: Vec<String> = TOKEN_RE
        .find_iter(&normalized)
        .map(|m| m.as_str().to_string())
        .collect();

    let mut segments = Vec::new();
    for clause in marked.split(SEGMENT_MARK) {
        let clause = collapse(clause);
        if clause.is_empty() {
            continue;
        }
        // The conjunction splits at token boundaries only; "android" stays whole.
        let mut current: Vec<&str> = Vec::new();
        for word in clause.split_whitespace() {
            if word == "and" {
                push_segment(&mut segments, &current);
                current.clear();
            } else {
                current.push(word);
            }
        }
        push_segment(&mut segments, &current);
    }

    NormalizedText {
        normalized,
        tokens,
        segments,
    }
}

/// First pass: lowercase, expand symbols, strip punctuation, record clause
/// boundaries where clause punctuation stood in the original.
fn mark(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        if CLAUSE_PUNCTUATION.contains(&ch) {
            out.push(SEGMENT_MARK);
        } else if SILENT_PUNCTUATION.contains(&ch) {
            // dropped
        } else if ch == '-' || ch == '_' {
            out.push(' ');
        } else if ch == '&' {
            out.push_str(" and ");
        } else if ch == '+' {
            out.push_str(" plus ");
        } else if ch == '@' {
            out.push_str(" at ");
        } else if ch == '#' {
            out.push_str(" hash ");
        } else if ch == '$' {
            out.push_str(" dollar ");
        } else if ch == '%' {
            out.push_str(" percent ");
        } else if ch.is_whitespace() {
            out.push(' ');
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    out
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn push_segment(segments: &mut Vec<String>, words: &[&str]) {
    if !words.is_empty() {
        segments.push(words.join(" "));
    }
}

/// Memoizing normalizer shared across the pipeline.
pub struct Normalizer {
    memo: Mutex<LruCache<String, Arc<NormalizedText>>>,
}

impl Normalizer {
    /// Create a normalizer with the given memo capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero capacity");
        Self {
            memo: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Normalize `text`, reusing a memoized result when available.
    pub fn normalize(&self, text: &str) -> Arc<NormalizedText> {
        {
            let mut memo = self.memo.lock();
            if let Some(hit) = memo.get(text) {
                return Arc::clone(hit);
            }
        }

        let result = Arc::new(normalize_text(text));
        self.memo
            .lock()
            .put(text.to_string(), Arc::clone(&result));
        result
    }

    /// Number of memoized entries.
    pub fn memo_len(&self) -> usize {
        self.memo.lock().len()
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MEMO_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_lowercase_and_strip() {
        let out = normalize_text("Add To Cart!");
        assert_eq!(out.normalized, "add to cart");
        assert_eq!(out.tokens, vec!["add", "to", "cart"]);
    }

    #[test]
    fn test_symbol_expansion() {
        let out = normalize_text("shoes & socks + laces @ home");
        assert_eq!(out.normalized, "shoes and socks plus laces at home");
    }

    #[test]
    fn test_hyphen_and_underscore_become_spaces() {
        let out = normalize_text("t-shirt track_order");
        assert_eq!(out.normalized, "t shirt track order");
    }

    #[test]
    fn test_segments_split_on_and() {
        let out = normalize_text("add shoes and track my order");
        assert_eq!(out.segments, vec!["add shoes", "track my order"]);
    }

    #[test]
    fn test_segments_split_on_punctuation() {
        let out = normalize_text("show my cart, then checkout");
        assert_eq!(out.segments, vec!["show my cart", "then checkout"]);
    }

    #[test]
    fn test_ampersand_also_splits_segments() {
        let out = normalize_text("shoes & socks");
        assert_eq!(out.normalized, "shoes and socks");
        assert_eq!(out.segments, vec!["shoes", "socks"]);
    }

    #[test]
    fn test_and_inside_word_does_not_split() {
        let out = normalize_text("android phone");
        assert_eq!(out.segments, vec!["android phone"]);
    }

    #[test]
    fn test_empty_segments_discarded() {
        let out = normalize_text("and ,, and");
        assert!(out.segments.is_empty());
    }

    #[test]
    fn test_empty_input() {
        let out = normalize_text("   ");
        assert!(out.is_empty());
        assert!(out.tokens.is_empty());
        assert!(out.segments.is_empty());
    }

    #[test]
    fn test_memo_reuses_results() {
        let normalizer = Normalizer::new(8);
        let a = normalizer.normalize("Add to cart");
        let b = normalizer.normalize("Add to cart");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(normalizer.memo_len(), 1);
    }

    #[test]
    fn test_memo_is_bounded() {
        let normalizer = Normalizer::new(2);
        normalizer.normalize("one");
        normalizer.normalize("two");
        normalizer.normalize("three");
        assert_eq!(normalizer.memo_len(), 2);
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(text in ".{0,200}") {
            let once = normalize_text(&text);
            let twice = normalize_text(&once.normalized);
            prop_assert_eq!(&once.normalized, &twice.normalized);
            prop_assert_eq!(&once.tokens, &twice.tokens);
        }

        #[test]
        fn prop_tokens_are_word_runs(text in "[a-zA-Z0-9 ,.!?&+-]{0,120}") {
            let out = normalize_text(&text);
            for token in &out.tokens {
                prop_assert!(token.chars().all(|c| c.is_alphanumeric() || c == '_'));
            }
        }
    }
}
