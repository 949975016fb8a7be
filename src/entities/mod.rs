//! Entity extraction and validation
//!
//! This module provides:
//! - The structured `Entities` record attached to classification results
//! - Rule-based extractors for brand, color, product type, size, and price
//! - Merging of LLM-returned entities with rule-based fallbacks
//! - Normalization and range validation

mod extract;
mod validate;

pub use extract::EntityExtractor;
pub use validate::validate_entities;

use serde::{Deserialize, Serialize};

/// Currencies the price extractor recognizes.
pub const KNOWN_CURRENCIES: [&str; 4] = ["USD", "EUR", "GBP", "INR"];

/// A price range constraint extracted from the query or the LLM.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceRange {
    /// Lower bound, inclusive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Upper bound, inclusive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// ISO currency code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl PriceRange {
    /// True when no bound is present.
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

/// Structured entities extracted for a classified query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Entities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_range: Option<PriceRange>,
}

impl Entities {
    /// True when every field is absent.
    pub fn is_empty(&self) -> bool {
        self.product_type.is_none()
            && self.category.is_none()
            && self.brand.is_none()
            && self.color.is_none()
            && self.size.is_none()
            && self.price_range.as_ref().map_or(true, PriceRange::is_empty)
    }

    /// `None` when empty, `Some(self)` otherwise.
    pub fn into_option(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}
