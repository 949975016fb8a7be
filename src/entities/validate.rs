//! Entity normalization and validation
//!
//! Applied after merging LLM and rule-based values. Invalid price ranges are
//! reset rather than surfaced; plausible-but-unknown values are kept with a
//! warning.

use tracing::warn;

use super::{Entities, PriceRange, KNOWN_CURRENCIES};

/// Upper price bound beyond which a parsed value is treated as noise.
const PRICE_CEILING: f64 = 1_000_000.0;

/// Normalize and validate entity fields in place.
pub fn validate_entities(entities: &mut Entities) {
    if let Some(brand) = entities.brand.take() {
        entities.brand = Some(title_case(&brand));
    }

    if let Some(color) = entities.color.take() {
        let folded = color.to_lowercase();
        let folded = if folded == "grey" { "gray".to_string() } else { folded };
        entities.color = Some(folded);
    }

    if let Some(size) = entities.size.take() {
        // Letter sizes read uppercased (m -> M); numeric sizes pass through.
        if size.chars().all(|c| c.is_ascii_alphabetic()) {
            entities.size = Some(size.to_uppercase());
        } else {
            entities.size = Some(size);
        }
    }

    if let Some(product) = entities.product_type.take() {
        entities.product_type = Some(product.to_lowercase());
    }

    if let Some(mut range) = entities.price_range.take() {
        if validate_range(&mut range) {
            entities.price_range = Some(range);
        }
    }
}

/// Validate one price range in place. Returns false when nothing valid
/// remains.
fn validate_range(range: &mut PriceRange) -> bool {
    if let Some(min) = range.min {
        if min < 0.0 || min > PRICE_CEILING {
            warn!(min, "implausible price minimum dropped");
            range.min = None;
        }
    }
    if let Some(max) = range.max {
        if max < 0.0 || max > PRICE_CEILING {
            warn!(max, "implausible price maximum dropped");
            range.max = None;
        }
    }
    if let (Some(min), Some(max)) = (range.min, range.max) {
        if min > max {
            warn!(min, max, "inverted price range reset");
            range.min = None;
            range.max = None;
        }
    }

    if let Some(currency) = range.currency.take() {
        let upper = currency.to_uppercase();
        if KNOWN_CURRENCIES.contains(&upper.as_str()) {
            range.currency = Some(upper);
        } else {
            warn!(currency = %currency, "unknown currency dropped");
        }
    }

    !range.is_empty()
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brand_title_cased() {
        let mut entities = Entities {
            brand: Some("new balance".to_string()),
            ..Default::default()
        };
        validate_entities(&mut entities);
        assert_eq!(entities.brand.as_deref(), Some("New Balance"));
    }

    #[test]
    fn test_letter_size_uppercased() {
        let mut entities = Entities {
            size: Some("xl".to_string()),
            ..Default::default()
        };
        validate_entities(&mut entities);
        assert_eq!(entities.size.as_deref(), Some("XL"));
    }

    #[test]
    fn test_numeric_size_untouched() {
        let mut entities = Entities {
            size: Some("42".to_string()),
            ..Default::default()
        };
        validate_entities(&mut entities);
        assert_eq!(entities.size.as_deref(), Some("42"));
    }

    #[test]
    fn test_inverted_range_reset() {
        let mut entities = Entities {
            price_range: Some(PriceRange {
                min: Some(80.0),
                max: Some(20.0),
                currency: Some("usd".to_string()),
            }),
            ..Default::default()
        };
        validate_entities(&mut entities);
        assert!(entities.price_range.is_none());
    }

    #[test]
    fn test_negative_bound_dropped() {
        let mut entities = Entities {
            price_range: Some(PriceRange {
                min: Some(-5.0),
                max: Some(20.0),
                currency: None,
            }),
            ..Default::default()
        };
        validate_entities(&mut entities);
        let range = entities.price_range.unwrap();
        assert_eq!(range.min, None);
        assert_eq!(range.max, Some(20.0));
    }

    #[test]
    fn test_unknown_currency_dropped() {
        let mut entities = Entities {
            price_range: Some(PriceRange {
                min: Some(1.0),
                max: Some(2.0),
                currency: Some("doge".to_string()),
            }),
            ..Default::default()
        };
        validate_entities(&mut entities);
        assert!(entities.price_range.unwrap().currency.is_none());
    }
}
