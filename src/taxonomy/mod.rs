//! Intent taxonomy
//!
//! This module provides:
//! - The closed `ActionCode` vocabulary and per-intent definitions
//! - Priority buckets and entity-kind requirements
//! - Keyword dictionary file parsing and validation
//! - JSON loaders for taxonomy and keyword data files
//!
//! The taxonomy is process-wide immutable state: it is built once at startup
//! (or on explicit reload) and shared via `Arc` snapshots.

mod intent;
mod loader;

pub use intent::{
    ActionCode, EntityKind, IntentCatalog, IntentDefinition, PriorityBucket, TaxonomyError,
    TaxonomyResult,
};
pub use loader::{load_intent_file, load_keyword_file, seed_catalog, seed_keywords, KeywordEntry};
