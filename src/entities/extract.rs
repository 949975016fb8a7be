//! Rule-based entity extraction
//!
//! Fills in entity fields the LLM left empty by scanning the original query
//! with word lists and regex detectors. The LLM's values always win when
//! present; rules only supply what is missing.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::text::normalize_text;

use super::validate::validate_entities;
use super::{Entities, PriceRange};

/// Known brand names, matched as token sequences (longest wins).
const BRANDS: [&str; 12] = [
    "nike",
    "adidas",
    "puma",
    "reebok",
    "new balance",
    "under armour",
    "levis",
    "zara",
    "h m",
    "gucci",
    "samsung",
    "apple",
];

/// Known colors. "grey" folds to "gray".
const COLORS: [&str; 12] = [
    "red", "blue", "green", "black", "white", "gray", "grey", "yellow", "pink", "purple", "brown",
    "orange",
];

/// Seed product types for rule-based extraction.
const PRODUCT_TYPES: [&str; 14] = [
    "shoes", "sneakers", "boots", "shirt", "t shirt", "dress", "jeans", "jacket", "socks", "bag",
    "watch", "phone", "laptop", "headphones",
];

static SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsize\s+([A-Za-z0-9]+)\b").expect("size regex"));

static UNDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:under|below|less than|cheaper than)\s*([$€£₹]?)\s*(\d+(?:\.\d+)?)")
        .expect("under regex")
});

static OVER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:over|above|more than)\s*([$€£₹]?)\s*(\d+(?:\.\d+)?)").expect("over regex")
});

static BETWEEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:between|from)\s*([$€£₹]?)\s*(\d+(?:\.\d+)?)\s*(?:and|to|-)\s*([$€£₹]?)\s*(\d+(?:\.\d+)?)",
    )
    .expect("between regex")
});

/// Rule-based extractor over the original (unnormalized) query.
pub struct EntityExtractor;

impl EntityExtractor {
    /// Create an extractor.
    pub fn new() -> Self {
        Self
    }

    /// Merge `llm_entities` with rule-based fallbacks for the fields it left
    /// empty, then validate and normalize. Returns `None` when every field
    /// ends up empty.
    pub fn merge(&self, query: &str, llm_entities: Option<Entities>) -> Option<Entities> {
        let mut entities = llm_entities.unwrap_or_default();

        if entities.brand.is_none() {
            entities.brand = self.extract_brand(query);
        }
        if entities.color.is_none() {
            entities.color = self.extract_color(query);
        }
        if entities.product_type.is_none() {
            entities.product_type = self.extract_product_type(query);
        }
        if entities.size.is_none() {
            entities.size = self.extract_size(query);
        }
        if entities.price_range.as_ref().map_or(true, PriceRange::is_empty) {
            entities.price_range = self.extract_price_range(query);
        }

        validate_entities(&mut entities);
        entities.into_option()
    }

    /// Extract entities with rules alone.
    pub fn extract(&self, query: &str) -> Option<Entities> {
        self.merge(query, None)
    }

    /// Longest matching token sequence against the brand list.
    pub fn extract_brand(&self, query: &str) -> Option<String> {
        let tokens = normalize_text(query).tokens;
        let mut best: Option<&str> = None;
        for brand in BRANDS {
            let brand_tokens: Vec<&str> = brand.split(' ').collect();
            if contains_sequence(&tokens, &brand_tokens)
                && best.map_or(true, |b| brand_tokens.len() > b.split(' ').count())
            {
                best = Some(brand);
            }
        }
        best.map(String::from)
    }

    /// Token match against the color list; "grey" folds to "gray".
    pub fn extract_color(&self, query: &str) -> Option<String> {
        let tokens = normalize_text(query).tokens;
        for color in COLORS {
            if tokens.iter().any(|t| t == color) {
                let folded = if color == "grey" { "gray" } else { color };
                return Some(folded.to_string());
            }
        }
        None
    }

    /// Token match against the product seed list; two-word types first.
    pub fn extract_product_type(&self, query: &str) -> Option<String> {
        let tokens = normalize_text(query).tokens;
        let mut single: Option<&str> = None;
        for product in PRODUCT_TYPES {
            let product_tokens: Vec<&str> = product.split(' ').collect();
            if contains_sequence(&tokens, &product_tokens) {
                if product_tokens.len() > 1 {
                    return Some(product.to_string());
                }
                single.get_or_insert(product);
            }
        }
        single.map(String::from)
    }

    /// `size <token>` pattern; letter sizes are uppercased by validation.
    pub fn extract_size(&self, query: &str) -> Option<String> {
        SIZE_RE
            .captures(query)
            .map(|caps| caps[1].to_string())
    }

    /// Price patterns: "under $X", "over X", "between X and Y", "from X to Y".
    pub fn extract_price_range(&self, query: &str) -> Option<PriceRange> {
        if let Some(caps) = BETWEEN_RE.captures(query) {
            let currency = currency_from(&caps[1]).or_else(|| currency_from(&caps[3]));
            return Some(PriceRange {
                min: caps[2].parse().ok(),
                max: caps[4].parse().ok(),
                currency: currency.or_else(|| currency_keyword(query)),
            });
        }
        if let Some(caps) = UNDER_RE.captures(query) {
            return Some(PriceRange {
                min: None,
                max: caps[2].parse().ok(),
                currency: currency_from(&caps[1]).or_else(|| currency_keyword(query)),
            });
        }
        if let Some(caps) = OVER_RE.captures(query) {
            return Some(PriceRange {
                min: caps[2].parse().ok(),
                max: None,
                currency: currency_from(&caps[1]).or_else(|| currency_keyword(query)),
            });
        }
        None
    }
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_sequence(tokens: &[String], needle: &[&str]) -> bool {
    if needle.is_empty() || tokens.len() < needle.len() {
        return false;
    }
    tokens
        .windows(needle.len())
        .any(|window| window.iter().zip(needle.iter()).all(|(t, n)| t == n))
}

fn currency_from(symbol: &str) -> Option<String> {
    match symbol {
        "$" => Some("USD".to_string()),
        "€" => Some("EUR".to_string()),
        "£" => Some("GBP".to_string()),
        "₹" => Some("INR".to_string()),
        _ => None,
    }
}

fn currency_keyword(query: &str) -> Option<String> {
    let lower = query.to_lowercase();
    if lower.contains("dollar") || lower.contains("usd") {
        Some("USD".to_string())
    } else if lower.contains("euro") || lower.contains("eur") {
        Some("EUR".to_string())
    } else if lower.contains("pound") || lower.contains("gbp") {
        Some("GBP".to_string())
    } else if lower.contains("rupee") || lower.contains("inr") {
        Some("INR".to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brand_longest_sequence_wins() {
        let extractor = EntityExtractor::new();
        assert_eq!(
            extractor.extract_brand("new balance sneakers please"),
            Some("new balance".to_string())
        );
        assert_eq!(extractor.extract_brand("nike running shoes"), Some("nike".to_string()));
        assert_eq!(extractor.extract_brand("plain shoes"), None);
    }

    #[test]
    fn test_grey_folds_to_gray() {
        let extractor = EntityExtractor::new();
        assert_eq!(extractor.extract_color("grey hoodie"), Some("gray".to_string()));
    }

    #[test]
    fn test_size_pattern() {
        let extractor = EntityExtractor::new();
        assert_eq!(extractor.extract_size("shoes size 42"), Some("42".to_string()));
        assert_eq!(extractor.extract_size("dress size m"), Some("m".to_string()));
        assert_eq!(extractor.extract_size("big shoes"), None);
    }

    #[test]
    fn test_price_under() {
        let extractor = EntityExtractor::new();
        let range = extractor.extract_price_range("red shoes under $50").unwrap();
        assert_eq!(range.max, Some(50.0));
        assert_eq!(range.min, None);
        assert_eq!(range.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn test_price_between() {
        let extractor = EntityExtractor::new();
        let range = extractor
            .extract_price_range("jackets between 40 and 80 euros")
            .unwrap();
        assert_eq!(range.min, Some(40.0));
        assert_eq!(range.max, Some(80.0));
        assert_eq!(range.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_price_from_to() {
        let extractor = EntityExtractor::new();
        let range = extractor.extract_price_range("from $20 to $60").unwrap();
        assert_eq!(range.min, Some(20.0));
        assert_eq!(range.max, Some(60.0));
    }

    #[test]
    fn test_merge_prefers_llm_values() {
        let extractor = EntityExtractor::new();
        let llm = Entities {
            brand: Some("Adidas".to_string()),
            ..Default::default()
        };
        let merged = extractor.merge("nike shoes in red", Some(llm)).unwrap();
        assert_eq!(merged.brand.as_deref(), Some("Adidas"));
        assert_eq!(merged.color.as_deref(), Some("red"));
        assert_eq!(merged.product_type.as_deref(), Some("shoes"));
    }

    #[test]
    fn test_empty_result_is_none() {
        let extractor = EntityExtractor::new();
        assert!(extractor.extract("hello there").is_none());
    }
}
