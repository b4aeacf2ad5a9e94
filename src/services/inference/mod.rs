// Inference provider seam and the engine that turns a foreground mask into a cutout

pub mod onnx;

use anyhow::Result;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, RgbImage};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

use crate::core::errors::InferenceError;
use crate::services::catalog::ModelDescriptor;
use crate::utils::{decode_image, describe_join_error, encode_png, sniff_format, ReclaimScope};

pub use onnx::OnnxProvider;

/// A loaded model, read-only after construction and shared by every request for it.
pub trait SegmentationSession: Send + Sync {
    /// Identifier of the model this session was built from
    fn model_id(&self) -> &str;

    /// Foreground probability mask (0 = background, 255 = foreground).
    ///
    /// The mask should match the input dimensions; the engine resizes it otherwise.
    fn predict_mask(&self, image: &RgbImage) -> Result<GrayImage>;
}

/// Creates sessions for catalog models.
///
/// Loading is slow and memory-hungry; it is always called from the blocking pool.
pub trait InferenceProvider: Send + Sync {
    fn load(&self, descriptor: &'static ModelDescriptor) -> Result<Arc<dyn SegmentationSession>>;

    /// Name used in logs and the health endpoint
    fn name(&self) -> &str {
        "custom"
    }
}

/// Runs segmentation for one image and applies the mask as alpha channel
#[derive(Debug, Clone, Copy, Default)]
pub struct InferenceEngine;

impl InferenceEngine {
    pub fn new() -> Self {
        Self
    }

    /// Remove the background of `image_bytes` using `session`.
    ///
    /// Runs on the blocking pool inside a reclamation scope. A panic in the model
    /// runtime is reported as `InferenceError::Aborted`; the process keeps serving.
    #[instrument(skip(self, session, image_bytes), fields(model = session.model_id(), bytes = image_bytes.len()))]
    pub async fn run(
        &self,
        session: Arc<dyn SegmentationSession>,
        image_bytes: Arc<Vec<u8>>,
    ) -> Result<Vec<u8>, InferenceError> {
        tokio::task::spawn_blocking(move || {
            let _scope = ReclaimScope::enter(format!("inference:{}", session.model_id()));
            Self::run_blocking(session.as_ref(), &image_bytes)
        })
        .await
        .map_err(|e| InferenceError::Aborted(describe_join_error(e)))?
    }

    /// Synchronous core of `run`
    pub fn run_blocking(
        session: &dyn SegmentationSession,
        image_bytes: &[u8],
    ) -> Result<Vec<u8>, InferenceError> {
        let start = Instant::now();
        let input_format = sniff_format(image_bytes);
        let img = decode_image(image_bytes).map_err(InferenceError::Decode)?;
        let (width, height) = (img.width(), img.height());

        let rgb = img.to_rgb8();
        let mask = session
            .predict_mask(&rgb)
            .map_err(|e| InferenceError::Runtime(format!("{:#}", e)))?;
        drop(rgb);

        let mask = fit_mask(mask, width, height)?;

        let mut rgba = img.into_rgba8();
        for (pixel, alpha) in rgba.pixels_mut().zip(mask.pixels()) {
            pixel[3] = pixel[3].min(alpha[0]);
        }

        let png = encode_png(&DynamicImage::ImageRgba8(rgba)).map_err(InferenceError::Encode)?;

        debug!(
            "Background removed for {}x{} {:?} image in {:.2}ms ({} bytes out)",
            width,
            height,
            input_format,
            start.elapsed().as_secs_f64() * 1000.0,
            png.len()
        );

        Ok(png)
    }
}

/// Resize a mask to the image size when the session returned another resolution
fn fit_mask(mask: GrayImage, width: u32, height: u32) -> Result<GrayImage, InferenceError> {
    let (mask_width, mask_height) = mask.dimensions();
    if (mask_width, mask_height) == (width, height) {
        return Ok(mask);
    }
    if mask_width == 0 || mask_height == 0 {
        return Err(InferenceError::InvalidMask {
            width,
            height,
            mask_width,
            mask_height,
        });
    }

    debug!(
        "Resizing mask {}x{} to image size {}x{}",
        mask_width, mask_height, width, height
    );
    Ok(image::imageops::resize(&mask, width, height, FilterType::Triangle))
}
