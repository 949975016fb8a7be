//! Decision engine
//!
//! This module provides:
//! - The request-path state machine orchestrating normalize → keyword →
//!   (short-circuit) → embedding → blend → gate → {answer | cache | enqueue}
//! - The `ClassificationResult` output type and status vocabulary
//! - An append-only record of ambiguous/unclear outcomes
//! - The bounded per-session context window used for LLM snapshots

mod decision;
mod record;
mod result;
mod session;

pub use decision::{DecisionEngine, EngineError, EngineOutcome, EngineResult};
pub use record::AmbiguityLog;
pub use result::{ClassificationResult, ClassificationStatus, FallbackSource};
pub use session::SessionWindow;
