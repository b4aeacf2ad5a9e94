// Shared fixtures for the HTTP integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use axum::body::Body;
use axum::http::{header, Request};
use axum::Router;
use image::{DynamicImage, GrayImage, Luma, RgbImage, Rgba, RgbaImage};

use bg_removal_api::services::ModelDescriptor;
use bg_removal_api::utils::encode_png;
use bg_removal_api::{
    create_router, AppState, BackgroundRemovalService, Config, InferenceProvider, Metrics,
    SegmentationSession,
};

pub const BOUNDARY: &str = "bg-removal-test-boundary";

/// Marks the whole frame as foreground
pub struct FullMaskSession(pub &'static str);

impl SegmentationSession for FullMaskSession {
    fn model_id(&self) -> &str {
        self.0
    }

    fn predict_mask(&self, image: &RgbImage) -> Result<GrayImage> {
        Ok(GrayImage::from_pixel(image.width(), image.height(), Luma([255])))
    }
}

/// Provider that counts loads, fails chosen models and can simulate slow loads
#[derive(Default)]
pub struct StubProvider {
    pub loads: AtomicUsize,
    pub failing: Vec<&'static str>,
    pub delay: Option<Duration>,
}

impl StubProvider {
    pub fn failing(models: &[&'static str]) -> Self {
        Self {
            failing: models.to_vec(),
            ..Default::default()
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl InferenceProvider for StubProvider {
    fn load(&self, descriptor: &'static ModelDescriptor) -> Result<Arc<dyn SegmentationSession>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing.contains(&descriptor.id) {
            bail!("simulated load failure for {}", descriptor.id);
        }
        Ok(Arc::new(FullMaskSession(descriptor.id)))
    }

    fn name(&self) -> &str {
        "stub"
    }
}

pub struct TestApp {
    pub router: Router,
    pub metrics: Metrics,
}

pub fn app_with(provider: Arc<StubProvider>, vars: &[(&str, &str)]) -> TestApp {
    let config = Arc::new(Config::from_vars(vars).unwrap());
    let metrics = Metrics::new();
    let service = Arc::new(BackgroundRemovalService::new(
        config.clone(),
        provider,
        metrics.clone(),
    ));
    let router = create_router(AppState {
        config,
        service,
        metrics: metrics.clone(),
    });
    TestApp { router, metrics }
}

pub fn app(provider: Arc<StubProvider>) -> TestApp {
    app_with(provider, &[])
}

/// PNG where every pixel has the given color
pub fn png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    encode_png(&DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        width,
        height,
        Rgba(rgba),
    )))
    .unwrap()
}

/// multipart/form-data body with a single file field
pub fn multipart_body(field: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"upload.png\"\r\n",
            field
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn upload_request(query: &str, field: &str, content_type: &str, data: &[u8]) -> Request<Body> {
    let uri = if query.is_empty() {
        "/remove-background".to_string()
    } else {
        format!("/remove-background?{}", query)
    };
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(field, content_type, data)))
        .unwrap()
}

pub fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}
