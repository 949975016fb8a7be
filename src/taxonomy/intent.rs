//! Action codes and intent definitions

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Taxonomy errors
#[derive(Error, Debug)]
pub enum TaxonomyError {
    #[error("Duplicate action code: {0}")]
    DuplicateCode(String),

    #[error("Unknown action code: {0}")]
    UnknownCode(String),

    #[error("Invalid confidence threshold {threshold} for {code}")]
    InvalidThreshold { code: String, threshold: f64 },

    #[error("Taxonomy file error: {0}")]
    FileError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result type for taxonomy operations
pub type TaxonomyResult<T> = Result<T, TaxonomyError>;

/// An identifier from the closed intent vocabulary (e.g. `ADD_TO_CART`).
///
/// Codes are compared lexicographically; that ordering is the final
/// tie-breaker everywhere candidates are ranked.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionCode(String);

impl ActionCode {
    /// Wrap a raw code string.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The raw code string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionCode {
    fn from(code: &str) -> Self {
        Self(code.to_string())
    }
}

/// Priority bucket of an intent definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityBucket {
    Critical,
    High,
    Medium,
    Low,
    Fallback,
}

/// Structured entity kinds an intent may require or accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    ProductType,
    Category,
    Brand,
    Color,
    Size,
    PriceRange,
}

/// One intent of the closed taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentDefinition {
    /// Unique action code.
    pub code: ActionCode,
    /// Category tag (e.g. "cart", "order", "search").
    pub category: String,
    /// Human description.
    pub description: String,
    /// Example phrases; at least five are recommended for stable reference
    /// embeddings.
    pub examples: Vec<String>,
    /// Entity kinds the intent cannot execute without.
    #[serde(default)]
    pub required_entities: Vec<EntityKind>,
    /// Entity kinds the intent can use when present.
    #[serde(default)]
    pub optional_entities: Vec<EntityKind>,
    /// Per-intent confidence threshold in [0, 1].
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Priority bucket.
    #[serde(default = "default_priority")]
    pub priority: PriorityBucket,
}

fn default_confidence_threshold() -> f64 {
    0.6
}

fn default_priority() -> PriorityBucket {
    PriorityBucket::Medium
}

impl IntentDefinition {
    /// Create a definition with default threshold and priority.
    pub fn new(
        code: impl Into<String>,
        category: impl Into<String>,
        description: impl Into<String>,
        examples: Vec<&str>,
    ) -> Self {
        Self {
            code: ActionCode::new(code),
            category: category.into(),
            description: description.into(),
            examples: examples.into_iter().map(String::from).collect(),
            required_entities: Vec::new(),
            optional_entities: Vec::new(),
            confidence_threshold: default_confidence_threshold(),
            priority: default_priority(),
        }
    }

    /// Set the priority bucket.
    pub fn with_priority(mut self, priority: PriorityBucket) -> Self {
        self.priority = priority;
        self
    }

    /// Set required entity kinds.
    pub fn with_required(mut self, kinds: Vec<EntityKind>) -> Self {
        self.required_entities = kinds;
        self
    }
}

/// Immutable catalog of all intent definitions, keyed by code.
#[derive(Debug, Clone, Default)]
pub struct IntentCatalog {
    definitions: BTreeMap<ActionCode, IntentDefinition>,
}

impl IntentCatalog {
    /// Build a catalog, rejecting duplicate codes and out-of-range
    /// thresholds.
    pub fn from_definitions(definitions: Vec<IntentDefinition>) -> TaxonomyResult<Self> {
        let mut map = BTreeMap::new();
        for def in definitions {
            if !(0.0..=1.0).contains(&def.confidence_threshold) {
                return Err(TaxonomyError::InvalidThreshold {
                    code: def.code.to_string(),
                    threshold: def.confidence_threshold,
                });
            }
            let code = def.code.clone();
            if map.insert(code.clone(), def).is_some() {
                return Err(TaxonomyError::DuplicateCode(code.to_string()));
            }
        }
        Ok(Self { definitions: map })
    }

    /// Look up a definition by code.
    pub fn get(&self, code: &ActionCode) -> Option<&IntentDefinition> {
        self.definitions.get(code)
    }

    /// True when `code` belongs to the vocabulary.
    pub fn contains(&self, code: &ActionCode) -> bool {
        self.definitions.contains_key(code)
    }

    /// All codes in lexicographic order.
    pub fn codes(&self) -> impl Iterator<Item = &ActionCode> {
        self.definitions.keys()
    }

    /// All definitions in code order.
    pub fn definitions(&self) -> impl Iterator<Item = &IntentDefinition> {
        self.definitions.values()
    }

    /// Number of intents.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// True when the catalog holds no intents.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for ActionCode {
    fn default() -> Self {
        Self(String::new())
    }
}
