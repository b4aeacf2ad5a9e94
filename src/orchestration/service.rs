// Background removal service: owns the catalog, session cache and pipeline

use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::core::config::{Config, PreloadMode};
use crate::core::errors::{PipelineError, PipelineResult};
use crate::core::types::{HealthResponse, ProcessedImage, ProcessingRequest};
use crate::orchestration::pipeline::RequestPipeline;
use crate::services::{InferenceProvider, ModelCatalog, SessionCache};
use crate::utils::Metrics;

/// Constructed once at process start and shared by every handler
pub struct BackgroundRemovalService {
    config: Arc<Config>,
    catalog: ModelCatalog,
    sessions: Arc<SessionCache>,
    pipeline: RequestPipeline,
    provider_name: String,
}

impl BackgroundRemovalService {
    pub fn new(config: Arc<Config>, provider: Arc<dyn InferenceProvider>, metrics: Metrics) -> Self {
        let catalog = ModelCatalog::builtin();
        let provider_name = provider.name().to_string();

        let sessions = Arc::new(SessionCache::new(
            provider,
            catalog,
            config.default_model(),
            config.models.fallback_on_load_failure,
            metrics.clone(),
        ));
        let pipeline = RequestPipeline::new(
            catalog,
            Arc::clone(&sessions),
            &config.processing,
            metrics,
        );

        Self {
            config,
            catalog,
            sessions,
            pipeline,
            provider_name,
        }
    }

    /// Preload models in eager mode; lazy mode loads on first request.
    ///
    /// Preload failures are logged, not fatal: requests retry the load later.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        if self.config.models.preload == PreloadMode::Lazy {
            info!("Lazy model loading: sessions are created on first use");
            return;
        }

        let mut models = vec![self.config.default_model().to_string()];
        for model in &self.config.models.preload_models {
            if !models.contains(model) {
                models.push(model.clone());
            }
        }

        info!("Eager model loading: {:?}", models);
        let results = join_all(models.iter().map(|model| self.sessions.get(model))).await;

        for (model, result) in models.iter().zip(results) {
            match result {
                Ok(session) if session.model_id() == model.as_str() => info!("✓ Preloaded {}", model),
                Ok(session) => warn!("Preload of {} fell back to {}", model, session.model_id()),
                Err(e) => warn!("Preload of {} failed: {}", model, e),
            }
        }
    }

    /// Force creation of the default model's session; returns its id
    #[instrument(skip(self))]
    pub async fn warmup(&self) -> PipelineResult<String> {
        let session = self
            .sessions
            .get(self.config.default_model())
            .await
            .map_err(PipelineError::ServiceUnavailable)?;
        Ok(session.model_id().to_string())
    }

    pub async fn process(&self, request: ProcessingRequest) -> PipelineResult<ProcessedImage> {
        self.pipeline.process(request).await
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn default_model(&self) -> &str {
        self.sessions.default_model()
    }

    pub fn health(&self) -> HealthResponse {
        let status = if self.sessions.default_load_failed() {
            "degraded"
        } else {
            "healthy"
        };

        HealthResponse {
            status: status.to_string(),
            service_initialized: true,
            default_model: self.sessions.default_model().to_string(),
            loaded_models: self.sessions.loaded_models(),
            memory_management: "scoped reclamation".to_string(),
            inference_provider: self.provider_name.clone(),
        }
    }

    /// Drop every session
    pub fn shutdown(&self) {
        info!("Shutting down background removal service");
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::ModelDescriptor;
    use crate::services::inference::SegmentationSession;
    use anyhow::{bail, Result};
    use image::{GrayImage, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSession(&'static str);

    impl SegmentationSession for StubSession {
        fn model_id(&self) -> &str {
            self.0
        }

        fn predict_mask(&self, image: &RgbImage) -> Result<GrayImage> {
            Ok(GrayImage::new(image.width(), image.height()))
        }
    }

    #[derive(Default)]
    struct StubProvider {
        loads: AtomicUsize,
        failing: Vec<&'static str>,
    }

    impl InferenceProvider for StubProvider {
        fn load(&self, descriptor: &'static ModelDescriptor) -> Result<Arc<dyn SegmentationSession>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&descriptor.id) {
                bail!("missing weights");
            }
            Ok(Arc::new(StubSession(descriptor.id)))
        }
    }

    fn service(vars: &[(&str, &str)], provider: Arc<StubProvider>) -> BackgroundRemovalService {
        let config = Arc::new(Config::from_vars(vars).unwrap());
        BackgroundRemovalService::new(config, provider, Metrics::new())
    }

    #[tokio::test]
    async fn test_lazy_start_loads_nothing() {
        let provider = Arc::new(StubProvider::default());
        let service = service(&[], provider.clone());

        service.start().await;
        assert_eq!(provider.loads.load(Ordering::SeqCst), 0);
        assert!(service.health().loaded_models.is_empty());
    }

    #[tokio::test]
    async fn test_eager_start_preloads() {
        let provider = Arc::new(StubProvider::default());
        let service = service(
            &[("MODEL_PRELOAD", "eager"), ("PRELOAD_MODELS", "silueta,u2net")],
            provider.clone(),
        );

        service.start().await;
        assert_eq!(provider.loads.load(Ordering::SeqCst), 2);
        assert_eq!(
            service.health().loaded_models,
            vec!["silueta".to_string(), "u2net".to_string()]
        );
    }

    #[tokio::test]
    async fn test_warmup_and_health() {
        let provider = Arc::new(StubProvider::default());
        let service = service(&[], provider);

        assert_eq!(service.warmup().await.unwrap(), "u2net");
        let health = service.health();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.default_model, "u2net");
        assert_eq!(health.loaded_models, vec!["u2net".to_string()]);

        service.shutdown();
        assert!(service.health().loaded_models.is_empty());
    }

    #[tokio::test]
    async fn test_warmup_failure_degrades_health() {
        let provider = Arc::new(StubProvider {
            failing: vec!["u2net"],
            ..Default::default()
        });
        let service = service(&[], provider);

        let err = service.warmup().await.unwrap_err();
        assert_eq!(err.kind(), "service_unavailable");
        assert_eq!(service.health().status, "degraded");
    }
}
