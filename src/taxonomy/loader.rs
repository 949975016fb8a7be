//! Taxonomy and keyword dictionary loaders
//!
//! Intent definition files are JSON arrays of definitions. Keyword files map
//! action codes to a file-local priority (1 highest .. 9 lowest) and a set of
//! keyword patterns. Malformed entries are dropped with a warning so a bad
//! file never takes the service down; a missing file means starting without
//! it.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::intent::{
    ActionCode, IntentCatalog, IntentDefinition, PriorityBucket, TaxonomyError, TaxonomyResult,
};

/// One keyword dictionary entry as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordEntry {
    /// File-local priority, 1 (highest) to 9 (lowest).
    pub priority: u8,
    /// Keyword patterns: literal phrases or regular expressions.
    pub keywords: Vec<String>,
}

impl KeywordEntry {
    /// Validate priority range and de-duplicate patterns case-insensitively.
    /// Empty patterns are dropped. Returns `None` when nothing valid remains.
    fn sanitized(mut self, code: &str) -> Option<Self> {
        if !(1..=9).contains(&self.priority) {
            warn!(code, priority = self.priority, "keyword entry priority out of range, skipping");
            return None;
        }

        let mut seen = Vec::new();
        let mut keywords = Vec::new();
        for pattern in self.keywords.drain(..) {
            let trimmed = pattern.trim();
            if trimmed.is_empty() {
                warn!(code, "empty keyword pattern dropped");
                continue;
            }
            let folded = trimmed.to_lowercase();
            if seen.contains(&folded) {
                continue;
            }
            seen.push(folded);
            keywords.push(trimmed.to_string());
        }

        if keywords.is_empty() {
            warn!(code, "keyword entry has no usable patterns, skipping");
            return None;
        }

        Some(Self {
            priority: self.priority,
            keywords,
        })
    }
}

/// Load an intent definition file (JSON array).
pub fn load_intent_file(path: &Path) -> TaxonomyResult<IntentCatalog> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| TaxonomyError::FileError(format!("{}: {e}", path.display())))?;
    let definitions: Vec<IntentDefinition> = serde_json::from_str(&raw)?;
    IntentCatalog::from_definitions(definitions)
}

/// Load a keyword dictionary file: `{ CODE: { "priority": n, "keywords": [...] } }`.
///
/// Entries for codes missing from `catalog` are dropped with a warning; the
/// closed vocabulary is authoritative.
pub fn load_keyword_file(
    path: &Path,
    catalog: &IntentCatalog,
) -> TaxonomyResult<BTreeMap<ActionCode, KeywordEntry>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| TaxonomyError::FileError(format!("{}: {e}", path.display())))?;
    let parsed: BTreeMap<String, KeywordEntry> = serde_json::from_str(&raw)?;

    let mut entries = BTreeMap::new();
    for (code, entry) in parsed {
        let action = ActionCode::new(code.clone());
        if !catalog.contains(&action) {
            warn!(code, "keyword entry for unknown action code dropped");
            continue;
        }
        if let Some(entry) = entry.sanitized(&code) {
            entries.insert(action, entry);
        }
    }
    Ok(entries)
}

/// Built-in seed taxonomy used when no intent files are configured and by the
/// test suites. Production deployments load the full ~200-code taxonomy from
/// data files; this seed covers the high-traffic codes of each category.
pub fn seed_catalog() -> IntentCatalog {
    let definitions = vec![
        IntentDefinition::new(
            "ADD_TO_CART",
            "cart",
            "Add a product to the shopping cart",
            vec![
                "add to cart",
                "add this to my cart",
                "put this in my basket",
                "add these shoes to cart",
                "i want to buy this",
            ],
        )
        .with_priority(PriorityBucket::Critical),
        IntentDefinition::new(
            "REMOVE_FROM_CART",
            "cart",
            "Remove a product from the shopping cart",
            vec![
                "remove from cart",
                "take this out of my cart",
                "delete item from basket",
                "remove the shoes from my cart",
                "i dont want this anymore",
            ],
        )
        .with_priority(PriorityBucket::High),
        IntentDefinition::new(
            "VIEW_CART",
            "cart",
            "Show the contents of the shopping cart",
            vec![
                "view cart",
                "show my cart",
                "whats in my basket",
                "open shopping cart",
                "see my cart items",
            ],
        )
        .with_priority(PriorityBucket::High),
        IntentDefinition::new(
            "CHECKOUT",
            "checkout",
            "Begin the checkout flow",
            vec![
                "checkout",
                "proceed to checkout",
                "buy everything in my cart",
                "complete my purchase",
                "pay for my order",
            ],
        )
        .with_priority(PriorityBucket::Critical),
        IntentDefinition::new(
            "SEARCH_PRODUCT",
            "search",
            "Search the catalog for products",
            vec![
                "search for red shoes",
                "find running shoes",
                "show me winter jackets",
                "looking for a blue dress",
                "do you have nike sneakers",
            ],
        )
        .with_priority(PriorityBucket::Medium),
        IntentDefinition::new(
            "VIEW_PRODUCT",
            "search",
            "Show details for one product",
            vec![
                "show product details",
                "tell me more about this item",
                "open this product",
                "view item description",
                "what are the specs of this",
            ],
        ),
        IntentDefinition::new(
            "TRACK_ORDER",
            "order",
            "Track the status of a placed order",
            vec![
                "track my order",
                "where is my package",
                "order status",
                "when will my order arrive",
                "track shipment",
            ],
        )
        .with_priority(PriorityBucket::High),
        IntentDefinition::new(
            "CANCEL_ORDER",
            "order",
            "Cancel a placed order",
            vec![
                "cancel my order",
                "i want to cancel the purchase",
                "stop my order",
                "cancel order number 123",
                "dont ship my order",
            ],
        )
        .with_priority(PriorityBucket::Critical),
        IntentDefinition::new(
            "RETURN_ITEM",
            "order",
            "Start a return for a delivered item",
            vec![
                "return this item",
                "i want to return my shoes",
                "start a return",
                "send this back",
                "how do i return a product",
            ],
        )
        .with_priority(PriorityBucket::High),
        IntentDefinition::new(
            "APPLY_COUPON",
            "promotion",
            "Apply a coupon or promo code",
            vec![
                "apply coupon",
                "use promo code save10",
                "add discount code",
                "redeem my voucher",
                "enter coupon code",
            ],
        ),
        IntentDefinition::new(
            "VIEW_WISHLIST",
            "wishlist",
            "Show the wishlist",
            vec![
                "view wishlist",
                "show my saved items",
                "open my wishlist",
                "whats on my wishlist",
                "see favorites",
            ],
        )
        .with_priority(PriorityBucket::Low),
        IntentDefinition::new(
            "ADD_TO_WISHLIST",
            "wishlist",
            "Save a product to the wishlist",
            vec![
                "add to wishlist",
                "save this for later",
                "add to favorites",
                "wishlist this item",
                "save this product",
            ],
        )
        .with_priority(PriorityBucket::Low),
        IntentDefinition::new(
            "CONTACT_SUPPORT",
            "support",
            "Reach a human support agent",
            vec![
                "contact support",
                "talk to an agent",
                "i need help from a person",
                "customer service",
                "speak to a representative",
            ],
        )
        .with_priority(PriorityBucket::High),
        IntentDefinition::new(
            "CHECK_AVAILABILITY",
            "inventory",
            "Check stock for a product",
            vec![
                "is this in stock",
                "check availability",
                "do you have this in size m",
                "is the blue one available",
                "when will this be back in stock",
            ],
        ),
    ];

    IntentCatalog::from_definitions(definitions).expect("seed taxonomy is valid")
}

/// Built-in keyword dictionary matching [`seed_catalog`].
pub fn seed_keywords() -> BTreeMap<ActionCode, KeywordEntry> {
    let raw: Vec<(&str, u8, Vec<&str>)> = vec![
        (
            "ADD_TO_CART",
            1,
            vec!["add to cart", "add to basket", r"\badd\b.*\bcart\b", "buy this"],
        ),
        (
            "REMOVE_FROM_CART",
            2,
            vec!["remove from cart", r"\bremove\b.*\bcart\b", "take out of cart"],
        ),
        (
            "VIEW_CART",
            2,
            vec!["view cart", "show cart", "my cart", "open cart"],
        ),
        (
            "CHECKOUT",
            1,
            vec!["checkout", "check out", "proceed to checkout", "place order", "pay now"],
        ),
        (
            "SEARCH_PRODUCT",
            4,
            vec!["search", "find", "show me", "looking for", r"\bsearch\b.*\bfor\b"],
        ),
        (
            "VIEW_PRODUCT",
            5,
            vec!["product details", "more about", "item description"],
        ),
        (
            "TRACK_ORDER",
            2,
            vec!["track order", "track my order", "where is my package", "order status"],
        ),
        (
            "CANCEL_ORDER",
            1,
            vec!["cancel order", "cancel my order", r"\bcancel\b.*\border\b"],
        ),
        (
            "RETURN_ITEM",
            2,
            vec!["return", "return item", "send back", "start a return"],
        ),
        (
            "APPLY_COUPON",
            3,
            vec!["coupon", "promo code", "discount code", "voucher"],
        ),
        ("VIEW_WISHLIST", 5, vec!["wishlist", "saved items", "favorites"]),
        (
            "ADD_TO_WISHLIST",
            4,
            vec!["add to wishlist", "save for later", "add to favorites"],
        ),
        (
            "CONTACT_SUPPORT",
            2,
            vec!["support", "customer service", "talk to an agent", "human agent"],
        ),
        (
            "CHECK_AVAILABILITY",
            4,
            vec!["in stock", "availability", "available", "back in stock"],
        ),
    ];

    raw.into_iter()
        .map(|(code, priority, keywords)| {
            (
                ActionCode::new(code),
                KeywordEntry {
                    priority,
                    keywords: keywords.into_iter().map(String::from).collect(),
                },
            )
        })
        .collect()
}
