// Request pipeline: validate -> session -> inference -> (composite) -> response

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument};

use crate::core::config::ProcessingConfig;
use crate::core::errors::{PipelineError, PipelineResult};
use crate::core::types::{OutputFormat, ProcessedImage, ProcessingRequest};
use crate::services::{Compositor, InferenceEngine, ModelCatalog, SessionCache};
use crate::utils::{reclaim, Metrics};

/// Runs one request through the processing stages.
///
/// Never returns partial output: every request ends in a `ProcessedImage` or a
/// `PipelineError`.
pub struct RequestPipeline {
    catalog: ModelCatalog,
    sessions: Arc<SessionCache>,
    engine: InferenceEngine,
    compositor: Compositor,
    max_upload_bytes: usize,
    backdrop: [u8; 3],
    metrics: Metrics,
}

impl RequestPipeline {
    pub fn new(
        catalog: ModelCatalog,
        sessions: Arc<SessionCache>,
        processing: &ProcessingConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            catalog,
            sessions,
            engine: InferenceEngine::new(),
            compositor: Compositor::new(processing.jpeg_quality),
            max_upload_bytes: processing.max_upload_bytes,
            backdrop: processing.backdrop_color,
            metrics,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Cheap checks that run before any model work
    pub fn validate(&self, request: &ProcessingRequest) -> PipelineResult<()> {
        if let Some(content_type) = &request.content_type {
            if !content_type.to_lowercase().starts_with("image/") {
                return Err(PipelineError::invalid_input(
                    "content_type",
                    "File must be an image",
                ));
            }
        }

        self.catalog.descriptor_for(&request.model)?;

        if request.image.is_empty() {
            return Err(PipelineError::invalid_input("image", "Image is empty"));
        }
        if request.image.len() > self.max_upload_bytes {
            return Err(PipelineError::invalid_input(
                "image",
                format!(
                    "Image is too large ({} bytes, limit {} bytes)",
                    request.image.len(),
                    self.max_upload_bytes
                ),
            ));
        }

        Ok(())
    }

    /// Run the full pipeline; failures are counted by kind
    #[instrument(skip(self, request), fields(model = %request.model, bytes = request.image.len()))]
    pub async fn process(&self, request: ProcessingRequest) -> PipelineResult<ProcessedImage> {
        let result = self.run(request).await;
        match &result {
            Ok(_) => self.metrics.record_success(),
            Err(e) => self.metrics.record_failure(e.kind()),
        }
        result
    }

    async fn run(&self, request: ProcessingRequest) -> PipelineResult<ProcessedImage> {
        debug!(
            "[received] model={} white_bg={} format={:?}",
            request.model, request.white_background, request.format
        );

        self.validate(&request)?;
        debug!("[validated]");

        let session = self.sessions.get(&request.model).await.map_err(|e| {
            error!("Session unavailable for {}: {}", request.model, e);
            PipelineError::ServiceUnavailable(e)
        })?;
        let model_used = session.model_id().to_string();
        debug!("[session_ready] using {}", model_used);

        let start = Instant::now();
        let cutout = match self.engine.run(session, Arc::clone(&request.image)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                reclaim();
                error!("Inference failed: {}", e);
                return Err(e.into());
            }
        };
        self.metrics.record_inference(start.elapsed());
        debug!(
            "[inferred] {} bytes in {:.2}ms",
            cutout.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        // JPEG cannot carry alpha, so it is always flattened
        let (bytes, format) = if request.white_background || request.format == OutputFormat::Jpeg {
            match self.compositor.flatten_async(cutout, self.backdrop).await {
                Ok(flattened) => {
                    debug!("[composited] {} bytes", flattened.0.len());
                    flattened
                }
                Err(e) => {
                    reclaim();
                    error!("Compositing failed: {}", e);
                    return Err(e.into());
                }
            }
        } else {
            (cutout, OutputFormat::Png)
        };

        debug!("[responded] {} as {}", model_used, format.mime_type());
        Ok(ProcessedImage {
            bytes,
            format,
            model_used,
            white_background: request.white_background,
        })
    }
}
