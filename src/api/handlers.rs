//! Request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::cache::CacheStats;
use crate::context::AppContext;
use crate::engine::{EngineError, EngineOutcome};
use crate::monitor::UsageSummaryWindow;
use crate::queue::QueueStats;
use crate::status::RequestStatus;

use super::responses::{ApiError, ClassifyResponse, HealthResponse, QueuedResponse};

/// Shared application state.
pub type AppState = Arc<AppContext>;

/// Classification request body.
#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub text: String,
    /// Optional session id for short-window context.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Either envelope a classify call can return.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ClassifyEnvelope {
    Classified(ClassifyResponse),
    Queued(QueuedResponse),
}

/// POST /api/v1/classify
pub async fn classify(
    State(state): State<AppState>,
    Json(request): Json<ClassifyRequest>,
) -> Result<Json<ClassifyEnvelope>, ApiError> {
    let outcome = state
        .engine
        .classify(&request.text, request.session_id.as_deref())
        .await
        .map_err(|e| match e {
            EngineError::InvalidInput(reason) => ApiError::invalid_input(reason),
            other => {
                error!(error = %other, "classification failed");
                ApiError::internal()
            }
        })?;

    let envelope = match outcome {
        EngineOutcome::Classified(result) => {
            ClassifyEnvelope::Classified(ClassifyResponse::from_result(result, &request.text))
        }
        EngineOutcome::Queued { request_id } => {
            ClassifyEnvelope::Queued(QueuedResponse::new(request_id))
        }
    };
    Ok(Json(envelope))
}

/// GET /api/v1/classify/status/:request_id
pub async fn get_status(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<RequestStatus>, ApiError> {
    let status = state.status.get(&request_id).await.map_err(|e| {
        error!(error = %e, "status lookup failed");
        ApiError::internal()
    })?;
    match status {
        Some(status) => Ok(Json(status)),
        None => Err(ApiError::not_found(format!(
            "No pending request with id {request_id}"
        ))),
    }
}

/// GET /api/v1/cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

/// Usage metrics envelope.
#[derive(Debug, Serialize)]
pub struct UsageMetrics {
    pub today: UsageSummaryWindow,
    pub this_month: UsageSummaryWindow,
    pub total_cost: f64,
    pub rate_limit_in_flight: usize,
    pub queue: QueueStats,
}

/// GET /api/v1/metrics/usage
pub async fn usage_metrics(State(state): State<AppState>) -> Json<UsageMetrics> {
    Json(UsageMetrics {
        today: state.usage.today(),
        this_month: state.usage.this_month(),
        total_cost: state.usage.total_cost(),
        rate_limit_in_flight: state.rate_limiter.in_flight(),
        queue: state.queue.stats().await,
    })
}

/// Variant switch response.
#[derive(Debug, Serialize)]
pub struct VariantResponse {
    pub active_variant: String,
    pub available: Vec<String>,
}

/// POST /api/v1/config/variant/:name
pub async fn switch_variant(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<VariantResponse>, ApiError> {
    state
        .config
        .switch_variant(&name)
        .map_err(|_| ApiError::not_found(format!("No variant named {name}")))?;
    Ok(Json(VariantResponse {
        active_variant: state.config.active().name.clone(),
        available: state.config.variant_names(),
    }))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let encoder_healthy = state.embeddings.is_healthy();
    let cache_degraded = state.cache.is_degraded();
    let status_store_degraded = state.status.is_degraded();
    let status = if encoder_healthy && !cache_degraded && !status_store_degraded {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthResponse {
        status: status.to_string(),
        encoder_healthy,
        cache_degraded,
        status_store_degraded,
    })
}
