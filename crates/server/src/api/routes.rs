use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::middleware::metrics_middleware;
use super::{batches, chat, handlers};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health, config and observability
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/orchestrator/status", get(handlers::orchestrator_status))
        .route("/metrics", get(handlers::get_metrics))
        // OpenAI-compatible surface
        .route("/v1/chat/completions", post(chat::chat_completions))
        // Batch status log
        .route("/v1/batches", get(batches::list_batches))
        .route("/v1/batches/{batch_id}", get(batches::get_batch))
        .route("/v1/batches/{batch_id}/cancel", post(batches::cancel_batch))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
