//! Quick background removal test binary
//! Run with: cargo run --release --bin test_remove -- <image_path> [model] [--white-bg]

use anyhow::{Context, Result};
use bg_removal_api::{
    core::{Config, ProcessingRequest},
    orchestration::BackgroundRemovalService,
    services::OnnxProvider,
    utils::Metrics,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("bg_removal_api=debug,ort=off")
        .with_target(false)
        .init();

    // Get image path and options from args
    let args: Vec<String> = std::env::args().skip(1).collect();
    let white_bg = args.iter().any(|arg| arg == "--white-bg");
    let positional: Vec<&String> = args.iter().filter(|arg| !arg.starts_with("--")).collect();

    let sample_path = positional
        .first()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "test_sample.png".to_string());

    if !Path::new(&sample_path).exists() {
        eprintln!("Image not found: {}", sample_path);
        std::process::exit(1);
    }

    let config = Arc::new(Config::new()?);
    let model = positional
        .get(1)
        .map(|s| s.to_string())
        .unwrap_or_else(|| config.default_model().to_string());

    info!("Loading image: {}", sample_path);
    let bytes = std::fs::read(&sample_path)
        .with_context(|| format!("Failed to read {}", sample_path))?;

    let metrics = Metrics::new();
    let provider = Arc::new(OnnxProvider::from_config(&config));
    let service = BackgroundRemovalService::new(config, provider, metrics.clone());

    info!("\n=== Removing background with {} ===", model);
    let request = ProcessingRequest::new(bytes, model).with_white_background(white_bg);
    let result = service.process(request).await?;

    let stem = Path::new(&sample_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let out_path = format!("{}_nobg.{}", stem, result.format.extension());
    std::fs::write(&out_path, &result.bytes)?;

    let snapshot = metrics.snapshot();
    println!("\n=== Results ===");
    println!("Model used: {}", result.model_used);
    println!("Output:     {} ({} bytes, {})", out_path, result.bytes.len(), result.mime_type());
    println!("Load:       {} ms", snapshot.session_load_avg_ms);
    println!("Inference:  {} ms", snapshot.inference_avg_ms);

    service.shutdown();
    Ok(())
}
