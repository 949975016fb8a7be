//! Route table

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{
    cache_stats, classify, get_status, health, switch_variant, usage_metrics, AppState,
};

/// Build the complete router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", v1_routes())
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn v1_routes() -> Router<AppState> {
    Router::new()
        .route("/classify", post(classify))
        .route("/classify/status/:request_id", get(get_status))
        .route("/cache/stats", get(cache_stats))
        .route("/metrics/usage", get(usage_metrics))
        .route("/config/variant/:name", post(switch_variant))
}
