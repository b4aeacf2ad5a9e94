// Endpoint handlers

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Multipart, Query, State,
    },
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Json},
};
use base64::{engine::general_purpose, Engine};
use std::time::Instant;
use tracing::info;

use super::{ApiError, ApiResult, AppState};
use crate::core::errors::PipelineError;
use crate::core::types::{
    Base64Request, Base64Response, HealthResponse, ModelList, ModelsResponse, OutputFormat,
    ProcessingRequest, RemoveBackgroundQuery, RootResponse, WarmupResponse,
};

const X_PROCESSING_MODEL: HeaderName = HeaderName::from_static("x-processing-model");

pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    state.metrics.record_endpoint_request("/");
    Json(RootResponse {
        message: "Background Removal API".to_string(),
        status: "running".to_string(),
        models: state
            .service
            .catalog()
            .ids()
            .into_iter()
            .map(String::from)
            .collect(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    state.metrics.record_endpoint_request("/health");
    Json(state.service.health())
}

pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    state.metrics.record_endpoint_request("/models");
    let models = state
        .service
        .catalog()
        .list_all()
        .iter()
        .map(|d| (d.id.to_string(), d.description.to_string()))
        .collect();
    Json(ModelsResponse {
        models: ModelList(models),
    })
}

/// Force creation of the default model's session
pub async fn warmup(State(state): State<AppState>) -> ApiResult<Json<WarmupResponse>> {
    state.metrics.record_endpoint_request("/warmup");
    let model_loaded = state.service.warmup().await?;
    info!("Warmup complete: {}", model_loaded);
    Ok(Json(WarmupResponse {
        status: "warmed_up".to_string(),
        model_loaded,
    }))
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
pub async fn stats_endpoint(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    serde_json::to_value(state.metrics.snapshot())
        .map(Json)
        .map_err(|e| ApiError::Internal(format!("Failed to serialize metrics: {}", e)))
}

/// Remove the background of an uploaded image
///
/// # Request Format:
/// - multipart/form-data, field "image"
/// - query: `model`, `white_bg`, `format` (png | jpeg)
///
/// # Response:
/// - the processed image, with `Content-Disposition` and `X-Processing-Model` headers
pub async fn remove_background(
    State(state): State<AppState>,
    query: Result<Query<RemoveBackgroundQuery>, QueryRejection>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    state.metrics.record_endpoint_request("/remove-background");
    let start_time = Instant::now();

    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let format = match query.format.as_deref() {
        Some(format) => format.parse::<OutputFormat>()?,
        None => OutputFormat::Png,
    };
    let model = query
        .model
        .unwrap_or_else(|| state.service.default_model().to_string());

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Read error: {}", e)))?;
        upload = Some((data.to_vec(), content_type));
        break;
    }

    let Some((image, content_type)) = upload else {
        return Err(PipelineError::invalid_input("image", "No image provided").into());
    };

    info!("Processing {} byte image with model {}", image.len(), model);

    let request = ProcessingRequest::new(image, model)
        .with_content_type(content_type)
        .with_white_background(query.white_bg)
        .with_format(format);
    let result = state.service.process(request).await?;

    info!(
        "Request completed in {:.2}s with {} ({} bytes)",
        start_time.elapsed().as_secs_f64(),
        result.model_used,
        result.bytes.len()
    );

    let headers = [
        (header::CONTENT_TYPE, result.mime_type().to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={}", result.file_name()),
        ),
        (X_PROCESSING_MODEL, result.model_used.clone()),
    ];
    Ok((StatusCode::OK, headers, result.bytes))
}

/// Remove the background of a base64-encoded image; responds with base64 PNG/JPEG
pub async fn remove_background_base64(
    State(state): State<AppState>,
    body: Result<Json<Base64Request>, JsonRejection>,
) -> ApiResult<Json<Base64Response>> {
    state.metrics.record_endpoint_request("/remove-background-base64");

    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let encoded = body
        .image
        .filter(|image| !image.trim().is_empty())
        .ok_or_else(|| PipelineError::invalid_input("image", "Missing base64 image"))?;
    let image = decode_base64_image(&encoded)?;

    let model = body
        .model
        .unwrap_or_else(|| state.service.default_model().to_string());
    let request = ProcessingRequest::new(image, model).with_white_background(body.white_bg);
    let result = state.service.process(request).await?;

    Ok(Json(Base64Response {
        success: true,
        image: general_purpose::STANDARD.encode(&result.bytes),
        model_used: result.model_used,
        white_background: result.white_background,
    }))
}

/// Decode standard base64, accepting an optional `data:<mime>;base64,` prefix
fn decode_base64_image(encoded: &str) -> Result<Vec<u8>, PipelineError> {
    let payload = match encoded.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();

    general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| PipelineError::invalid_input("image", format!("Invalid base64 data: {}", e)))
}
