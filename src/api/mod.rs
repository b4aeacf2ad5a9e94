// HTTP surface of the service

pub mod error;
pub mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::core::config::Config;
use crate::orchestration::BackgroundRemovalService;
use crate::utils::Metrics;

pub use error::{ApiError, ApiResult};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: Arc<BackgroundRemovalService>,
    pub metrics: Metrics,
}

/// Body limit leaving room for multipart and base64 overhead, so oversize images
/// reach the pipeline's own size check
pub fn body_limit(max_upload_bytes: usize) -> usize {
    max_upload_bytes
        .saturating_mul(2)
        .saturating_add(1024 * 1024)
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let limit = body_limit(state.config.max_upload_bytes());

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/models", get(handlers::list_models))
        .route("/warmup", get(handlers::warmup))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/stats", get(handlers::stats_endpoint))
        .route("/remove-background", post(handlers::remove_background))
        .route(
            "/remove-background-base64",
            post(handlers::remove_background_base64),
        )
        .with_state(state)
        .layer(DefaultBodyLimit::max(limit))
        .layer(cors)
}
