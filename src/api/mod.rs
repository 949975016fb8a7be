//! HTTP adapter
//!
//! This module provides:
//! - The axum router and versioned route table
//! - Request handlers for classify, status polling, cache stats, usage
//!   metrics, and health
//! - Response envelopes that never leak internals to clients

mod handlers;
mod responses;
mod routes;

pub use handlers::AppState;
pub use responses::{ApiError, ClassifyResponse, HealthResponse, QueuedResponse};
pub use routes::create_router;
