// Per-model session cache: lazy creation, permanent memoization, fallback to the default model

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};
use tracing::{error, info, warn};

use crate::core::errors::ModelLoadError;
use crate::services::catalog::ModelCatalog;
use crate::services::inference::{InferenceProvider, SegmentationSession};
use crate::utils::{describe_join_error, Metrics, ReclaimScope};

/// Memoized session plus the lock that serializes its first load
#[derive(Default)]
struct Slot {
    session: OnceCell<Arc<dyn SegmentationSession>>,
    init: Mutex<()>,
}

/// Holds at most one session per model identifier.
///
/// Concurrent first requests for an identifier share a single load; requests for
/// different identifiers never wait on each other.
pub struct SessionCache {
    provider: Arc<dyn InferenceProvider>,
    catalog: ModelCatalog,
    default_model: String,
    fallback_enabled: bool,
    slots: DashMap<String, Arc<Slot>>,
    default_load_failed: AtomicBool,
    metrics: Metrics,
}

impl SessionCache {
    pub fn new(
        provider: Arc<dyn InferenceProvider>,
        catalog: ModelCatalog,
        default_model: impl Into<String>,
        fallback_enabled: bool,
        metrics: Metrics,
    ) -> Self {
        Self {
            provider,
            catalog,
            default_model: default_model.into(),
            fallback_enabled,
            slots: DashMap::new(),
            default_load_failed: AtomicBool::new(false),
            metrics,
        }
    }

    /// Session for `model_id`, created on first use.
    ///
    /// If a non-default model fails to load and fallback is enabled, the default
    /// model's session is returned instead and remembered for that identifier.
    /// Concurrent callers wait for the first attempt, successful or not.
    pub async fn get(&self, model_id: &str) -> Result<Arc<dyn SegmentationSession>, ModelLoadError> {
        self.get_or_load(model_id, || self.load_with_fallback(model_id))
            .await
    }

    /// Session for `model_id` if one has been created
    pub fn get_cached(&self, model_id: &str) -> Option<Arc<dyn SegmentationSession>> {
        self.slots
            .get(model_id)
            .and_then(|slot| slot.session.get().cloned())
    }

    /// Identifiers backed by their own session, sorted; fallback substitutions are skipped
    pub fn loaded_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self
            .slots
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .session
                    .get()
                    .is_some_and(|session| session.model_id() == entry.key().as_str())
            })
            .map(|entry| entry.key().clone())
            .collect();
        models.sort();
        models
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Whether the most recent attempt to load the default model failed
    pub fn default_load_failed(&self) -> bool {
        self.default_load_failed.load(Ordering::Relaxed)
    }

    /// Drop every session
    pub fn clear(&self) {
        let count = self.loaded_models().len();
        self.slots.clear();
        info!("Released {} model session(s)", count);
    }

    fn slot(&self, model_id: &str) -> Arc<Slot> {
        // Clone the slot out so no map guard is held across an await
        self.slots
            .entry(model_id.to_string())
            .or_default()
            .clone()
    }

    /// Memoized session for `model_id`, running `init` under the slot lock if absent.
    /// A failed `init` leaves the slot empty so a later request retries.
    async fn get_or_load<F, Fut>(
        &self,
        model_id: &str,
        init: F,
    ) -> Result<Arc<dyn SegmentationSession>, ModelLoadError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn SegmentationSession>, ModelLoadError>>,
    {
        let slot = self.slot(model_id);
        if let Some(session) = slot.session.get() {
            return Ok(session.clone());
        }

        let _guard = slot.init.lock().await;
        if let Some(session) = slot.session.get() {
            return Ok(session.clone());
        }

        let session = init().await?;
        // Only the lock holder sets the slot
        let _ = slot.session.set(session.clone());
        Ok(session)
    }

    async fn load_with_fallback(
        &self,
        model_id: &str,
    ) -> Result<Arc<dyn SegmentationSession>, ModelLoadError> {
        match self.load(model_id.to_string()).await {
            Ok(session) => Ok(session),
            Err(err) if model_id != self.default_model && self.fallback_enabled => {
                warn!(
                    "Failed to initialize model {}: {}. Falling back to {}",
                    model_id, err.cause, self.default_model
                );
                self.metrics.record_fallback();

                self.get_or_load(&self.default_model, || {
                    self.load(self.default_model.clone())
                })
                .await
            }
            Err(err) => Err(err),
        }
    }

    async fn load(&self, model_id: String) -> Result<Arc<dyn SegmentationSession>, ModelLoadError> {
        let result = self.load_uncounted(&model_id).await;

        if model_id == self.default_model {
            self.default_load_failed
                .store(result.is_err(), Ordering::Relaxed);
        }
        if let Err(err) = &result {
            self.metrics.record_session_load_failure();
            if model_id == self.default_model {
                error!("❌ Default model failed to load: {}", err);
            }
        }
        result
    }

    async fn load_uncounted(
        &self,
        model_id: &str,
    ) -> Result<Arc<dyn SegmentationSession>, ModelLoadError> {
        let descriptor = self
            .catalog
            .descriptor_for(model_id)
            .map_err(|e| ModelLoadError::new(model_id, e))?;

        info!("🔄 Initializing model: {}", model_id);
        let start = Instant::now();

        let provider = Arc::clone(&self.provider);
        let session = tokio::task::spawn_blocking(move || {
            let _scope = ReclaimScope::enter(format!("load:{}", descriptor.id));
            provider.load(descriptor)
        })
        .await
        .map_err(|e| ModelLoadError::new(model_id, describe_join_error(e)))?
        .map_err(|e| ModelLoadError::new(model_id, format!("{:#}", e)))?;

        let elapsed = start.elapsed();
        self.metrics.record_session_load(elapsed);
        info!(
            "✓ Model {} ready in {:.2}s ({})",
            model_id,
            elapsed.as_secs_f64(),
            self.provider.name()
        );

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::ModelDescriptor;
    use anyhow::{bail, Result};
    use image::{GrayImage, RgbImage};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

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
    struct CountingProvider {
        loads: AtomicUsize,
        failing: Vec<&'static str>,
        delay: Option<Duration>,
    }

    impl InferenceProvider for CountingProvider {
        fn load(&self, descriptor: &'static ModelDescriptor) -> Result<Arc<dyn SegmentationSession>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if self.failing.contains(&descriptor.id) {
                bail!("weights for {} are corrupt", descriptor.id);
            }
            Ok(Arc::new(StubSession(descriptor.id)))
        }
    }

    fn cache_with(provider: Arc<CountingProvider>, fallback: bool) -> SessionCache {
        SessionCache::new(
            provider,
            ModelCatalog::builtin(),
            "u2net",
            fallback,
            Metrics::new(),
        )
    }

    #[tokio::test]
    async fn test_session_is_reused() {
        let provider = Arc::new(CountingProvider::default());
        let cache = cache_with(provider.clone(), true);

        let first = cache.get("u2net").await.unwrap();
        let second = cache.get("u2net").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.loaded_models(), vec!["u2net".to_string()]);
        assert!(cache.get_cached("u2net").is_some());
        assert!(cache.get_cached("silueta").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_requests_load_once() {
        let provider = Arc::new(CountingProvider {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let cache = Arc::new(cache_with(provider.clone(), true));

        let tasks = (0..8).map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get("silueta").await })
        });
        let sessions: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(provider.loads.load(Ordering::SeqCst), 1);
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_for_failing_model_load_once() {
        let provider = Arc::new(CountingProvider {
            failing: vec!["birefnet-general"],
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let cache = Arc::new(cache_with(provider.clone(), true));

        let tasks = (0..8).map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get("birefnet-general").await })
        });
        let sessions: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        // One failing attempt, one default load
        assert_eq!(provider.loads.load(Ordering::SeqCst), 2);
        assert!(sessions.iter().all(|s| s.model_id() == "u2net"));
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
        assert_eq!(cache.metrics.snapshot().session_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_failed_model_falls_back_to_default() {
        let provider = Arc::new(CountingProvider {
            failing: vec!["birefnet-general"],
            ..Default::default()
        });
        let cache = cache_with(provider.clone(), true);

        let session = cache.get("birefnet-general").await.unwrap();
        assert_eq!(session.model_id(), "u2net");

        // Substitution is memoized: no further load attempts
        let again = cache.get("birefnet-general").await.unwrap();
        assert!(Arc::ptr_eq(&session, &again));
        assert_eq!(provider.loads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.loaded_models(), vec!["u2net".to_string()]);

        let snapshot = cache.metrics.snapshot();
        assert_eq!(snapshot.session_fallbacks, 1);
        assert_eq!(snapshot.session_load_failures, 1);
        assert!(!cache.default_load_failed());
    }

    #[tokio::test]
    async fn test_unknown_model_falls_back_to_default() {
        let provider = Arc::new(CountingProvider::default());
        let cache = cache_with(provider, true);

        let session = cache.get("not-a-model").await.unwrap();
        assert_eq!(session.model_id(), "u2net");
    }

    #[tokio::test]
    async fn test_default_model_failure_is_an_error() {
        let provider = Arc::new(CountingProvider {
            failing: vec!["u2net"],
            ..Default::default()
        });
        let cache = cache_with(provider, true);

        let err = cache.get("u2net").await.err().expect("expected an error");
        assert_eq!(err.model_id, "u2net");
        assert!(err.cause.contains("corrupt"));
        assert!(cache.default_load_failed());
        assert!(cache.loaded_models().is_empty());

        // Other models are unaffected
        let session = cache.get("silueta").await.unwrap();
        assert_eq!(session.model_id(), "silueta");
    }

    #[tokio::test]
    async fn test_fallback_target_failure_is_an_error() {
        let provider = Arc::new(CountingProvider {
            failing: vec!["u2net", "silueta"],
            ..Default::default()
        });
        let cache = cache_with(provider, true);

        let err = cache.get("silueta").await.err().expect("expected an error");
        assert_eq!(err.model_id, "u2net");
    }

    #[tokio::test]
    async fn test_fallback_disabled_returns_error() {
        let provider = Arc::new(CountingProvider {
            failing: vec!["silueta"],
            ..Default::default()
        });
        let cache = cache_with(provider, false);

        let err = cache.get("silueta").await.err().expect("expected an error");
        assert_eq!(err.model_id, "silueta");
        assert!(cache.loaded_models().is_empty());
    }

    #[tokio::test]
    async fn test_clear_drops_sessions() {
        let provider = Arc::new(CountingProvider::default());
        let cache = cache_with(provider.clone(), true);

        cache.get("u2net").await.unwrap();
        cache.clear();
        assert!(cache.loaded_models().is_empty());

        cache.get("u2net").await.unwrap();
        assert_eq!(provider.loads.load(Ordering::SeqCst), 2);
    }
}
