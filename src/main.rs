// Main entry point for the background removal service

use bg_removal_api::{
    api::{create_router, AppState},
    core::Config,
    orchestration::BackgroundRemovalService,
    services::OnnxProvider,
    utils::Metrics,
};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new().context("Failed to load configuration")?);

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "bg_removal_api={},ort=off",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== BACKGROUND REMOVAL API ===");
    info!(
        "Config: default={} preload={:?} fallback={} max_upload={}MB backend={}",
        config.default_model(),
        config.models.preload,
        if config.models.fallback_on_load_failure { "ON" } else { "OFF" },
        config.max_upload_bytes() / (1024 * 1024),
        config.models.inference_backend.as_deref().unwrap_or("auto")
    );

    // Initialize metrics
    let metrics = Metrics::new();

    // Initialize service
    info!("Initializing background removal service...");
    let provider = Arc::new(OnnxProvider::from_config(&config));
    let service = Arc::new(BackgroundRemovalService::new(
        config.clone(),
        provider,
        metrics.clone(),
    ));
    service.start().await;

    let state = AppState {
        config: config.clone(),
        service: service.clone(),
        metrics,
    };
    let app = create_router(state);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /                          - Root endpoint");
    info!("  GET  /health                    - Health check");
    info!("  GET  /models                    - Available models");
    info!("  GET  /warmup                    - Load the default model");
    info!("  GET  /metrics                   - Prometheus metrics");
    info!("  GET  /stats                     - Detailed statistics");
    info!("  POST /remove-background         - Remove background (multipart/form-data)");
    info!("  POST /remove-background-base64  - Remove background (JSON, base64)");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.shutdown();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
