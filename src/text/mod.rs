//! Text normalization pipeline
//!
//! This module provides:
//! - Canonical normalization of user utterances (case folding, symbol
//!   expansion, punctuation handling)
//! - Tokenization into word runs
//! - Segmentation on conjunctions and clause punctuation
//! - A bounded LRU memo for hot-path reuse

mod normalizer;

pub use normalizer::{normalize_text, NormalizedText, Normalizer};
