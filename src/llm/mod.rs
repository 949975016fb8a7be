//! Resilient LLM client
//!
//! This module provides:
//! - An abstract `LlmBackend` (single attempt) and an HTTP implementation
//! - Retry with exponential backoff and jitter around the backend
//! - Error classification driving per-kind retry policy and alerting
//! - A per-model price table and a hard per-request cost ceiling checked
//!   before any network call
//! - Structured response parsing into `{action_code, confidence, entities,
//!   reasoning}`

mod client;
mod prompt;

pub use client::{
    HttpLlmBackend, LlmBackend, LlmClient, LlmClientConfig, LlmError, LlmErrorKind, LlmRequest,
    LlmResponse, LlmResult, LlmUsage, ModelPrice, PriceTable, RetryPolicy,
};
pub use prompt::{PromptLibrary, ACTIVE_PROMPT_VERSION};
