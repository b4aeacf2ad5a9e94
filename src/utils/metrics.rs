use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::utils::memory;

/// Global metrics collector for the service.
///
/// Tracks request outcomes, session lifecycle and inference latency.
/// Thread-safe and can be shared across the application.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Request Metrics
    requests_success: AtomicUsize,
    requests_invalid: AtomicUsize,
    requests_unavailable: AtomicUsize,
    requests_processing_failed: AtomicUsize,

    // Session Metrics
    session_loads: AtomicUsize,
    session_load_failures: AtomicUsize,
    session_fallbacks: AtomicUsize,
    session_load_ms: RwLock<Vec<u64>>,

    // Inference Metrics
    inference_ms: RwLock<Vec<u64>>,

    // Per-endpoint request counters
    endpoint_counters: DashMap<String, AtomicUsize>,

    // Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                requests_success: AtomicUsize::new(0),
                requests_invalid: AtomicUsize::new(0),
                requests_unavailable: AtomicUsize::new(0),
                requests_processing_failed: AtomicUsize::new(0),
                session_loads: AtomicUsize::new(0),
                session_load_failures: AtomicUsize::new(0),
                session_fallbacks: AtomicUsize::new(0),
                session_load_ms: RwLock::new(Vec::new()),
                inference_ms: RwLock::new(Vec::new()),
                endpoint_counters: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    // Request Metrics
    pub fn record_success(&self) {
        self.inner.requests_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed request by error kind (see `PipelineError::kind`)
    pub fn record_failure(&self, kind: &str) {
        let counter = match kind {
            "invalid_input" => &self.inner.requests_invalid,
            "service_unavailable" => &self.inner.requests_unavailable,
            _ => &self.inner.requests_processing_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    // Session Metrics
    pub fn record_session_load(&self, duration: Duration) {
        self.inner.session_loads.fetch_add(1, Ordering::Relaxed);
        self.inner.session_load_ms.write().push(duration.as_millis() as u64);
    }

    pub fn record_session_load_failure(&self) {
        self.inner.session_load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.inner.session_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    // Inference Metrics
    pub fn record_inference(&self, duration: Duration) {
        self.inner.inference_ms.write().push(duration.as_millis() as u64);
    }

    // Endpoint Metrics
    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner
            .endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inference = self.inner.inference_ms.read();
        let inference_avg = avg(&inference);
        let inference_p50 = percentile(&inference, 0.5);
        let inference_p95 = percentile(&inference, 0.95);
        let inference_count = inference.len();
        drop(inference);

        let loads = self.inner.session_load_ms.read();
        let session_load_avg = avg(&loads);
        drop(loads);

        let mut endpoint_requests: Vec<(String, usize)> = self
            .inner
            .endpoint_counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();
        endpoint_requests.sort();

        MetricsSnapshot {
            requests_success: self.inner.requests_success.load(Ordering::Relaxed),
            requests_invalid: self.inner.requests_invalid.load(Ordering::Relaxed),
            requests_unavailable: self.inner.requests_unavailable.load(Ordering::Relaxed),
            requests_processing_failed: self
                .inner
                .requests_processing_failed
                .load(Ordering::Relaxed),
            endpoint_requests,
            session_loads: self.inner.session_loads.load(Ordering::Relaxed),
            session_load_failures: self.inner.session_load_failures.load(Ordering::Relaxed),
            session_fallbacks: self.inner.session_fallbacks.load(Ordering::Relaxed),
            session_load_avg_ms: session_load_avg,
            inference_count,
            inference_avg_ms: inference_avg,
            inference_p50_ms: inference_p50,
            inference_p95_ms: inference_p95,
            reclaim_passes: memory::reclaim_passes(),
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = format!(
            r#"# HELP requests_total Requests by outcome
# TYPE requests_total counter
requests_total {{outcome="success"}} {}
requests_total {{outcome="invalid_input"}} {}
requests_total {{outcome="service_unavailable"}} {}
requests_total {{outcome="processing_error"}} {}

# HELP session_loads_total Model sessions created
# TYPE session_loads_total counter
session_loads_total {{}} {}

# HELP session_load_failures_total Model session creation failures
# TYPE session_load_failures_total counter
session_load_failures_total {{}} {}

# HELP session_fallbacks_total Requests served by the default model after a load failure
# TYPE session_fallbacks_total counter
session_fallbacks_total {{}} {}

# HELP session_load_avg_ms Average session creation time in milliseconds
# TYPE session_load_avg_ms gauge
session_load_avg_ms {{}} {}

# HELP inference_avg_ms Average inference time in milliseconds
# TYPE inference_avg_ms gauge
inference_avg_ms {{}} {}

# HELP inference_p95_ms 95th percentile inference time in milliseconds
# TYPE inference_p95_ms gauge
inference_p95_ms {{}} {}

# HELP reclaim_passes_total Memory reclamation passes
# TYPE reclaim_passes_total counter
reclaim_passes_total {{}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            snapshot.requests_success,
            snapshot.requests_invalid,
            snapshot.requests_unavailable,
            snapshot.requests_processing_failed,
            snapshot.session_loads,
            snapshot.session_load_failures,
            snapshot.session_fallbacks,
            snapshot.session_load_avg_ms,
            snapshot.inference_avg_ms,
            snapshot.inference_p95_ms,
            snapshot.reclaim_passes,
            snapshot.uptime_seconds,
        );

        if !snapshot.endpoint_requests.is_empty() {
            out.push_str("\n# HELP endpoint_requests_total Requests per endpoint\n");
            out.push_str("# TYPE endpoint_requests_total counter\n");
            for (endpoint, count) in &snapshot.endpoint_requests {
                out.push_str(&format!(
                    "endpoint_requests_total {{endpoint=\"{}\"}} {}\n",
                    endpoint, count
                ));
            }
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests_success: usize,
    pub requests_invalid: usize,
    pub requests_unavailable: usize,
    pub requests_processing_failed: usize,
    pub endpoint_requests: Vec<(String, usize)>,
    pub session_loads: usize,
    pub session_load_failures: usize,
    pub session_fallbacks: usize,
    pub session_load_avg_ms: u64,
    pub inference_count: usize,
    pub inference_avg_ms: u64,
    pub inference_p50_ms: u64,
    pub inference_p95_ms: u64,
    pub reclaim_passes: usize,
    pub uptime_seconds: u64,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record_success();
        metrics.record_failure("invalid_input");
        metrics.record_failure("service_unavailable");
        metrics.record_failure("processing_error");
        metrics.record_session_load(Duration::from_millis(1200));
        metrics.record_session_load_failure();
        metrics.record_fallback();
        metrics.record_inference(Duration::from_millis(100));
        metrics.record_inference(Duration::from_millis(300));
        metrics.record_endpoint_request("/remove-background");
        metrics.record_endpoint_request("/remove-background");
        metrics.record_endpoint_request("/health");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_success, 1);
        assert_eq!(snapshot.requests_invalid, 1);
        assert_eq!(snapshot.requests_unavailable, 1);
        assert_eq!(snapshot.requests_processing_failed, 1);
        assert_eq!(snapshot.session_loads, 1);
        assert_eq!(snapshot.session_load_failures, 1);
        assert_eq!(snapshot.session_fallbacks, 1);
        assert_eq!(snapshot.session_load_avg_ms, 1200);
        assert_eq!(snapshot.inference_count, 2);
        assert_eq!(snapshot.inference_avg_ms, 200);
        assert_eq!(snapshot.inference_p95_ms, 100);
        assert_eq!(
            snapshot.endpoint_requests,
            vec![
                ("/health".to_string(), 1),
                ("/remove-background".to_string(), 2)
            ]
        );
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_success();
        metrics.record_session_load(Duration::from_millis(10));
        metrics.record_endpoint_request("/warmup");

        let prometheus = metrics.to_prometheus();
        assert!(prometheus.contains("requests_total {outcome=\"success\"} 1"));
        assert!(prometheus.contains("session_loads_total {} 1"));
        assert!(prometheus.contains("endpoint_requests_total {endpoint=\"/warmup\"} 1"));
    }
}
