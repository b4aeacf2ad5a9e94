// ONNX Runtime session builder with hardware acceleration probing
//
// Providers compiled in through Cargo features are tried in order of preference;
// the CPU provider is always the last resort.

use anyhow::{bail, Context, Result};
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::{builder::GraphOptimizationLevel, Session};
use tracing::{debug, info, warn};

#[cfg(feature = "tensorrt")]
use ort::execution_providers::TensorRTExecutionProvider;

#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;

#[cfg(all(target_os = "macos", feature = "coreml"))]
use ort::execution_providers::CoreMLExecutionProvider;

#[cfg(all(target_os = "windows", feature = "directml"))]
use ort::execution_providers::DirectMLExecutionProvider;

#[cfg(feature = "openvino")]
use ort::execution_providers::OpenVINOExecutionProvider;

/// Thread settings applied to every session
#[derive(Debug, Clone, Copy)]
pub struct ThreadConfig {
    pub intra_threads: usize,
}

impl ThreadConfig {
    pub fn new(intra_threads: usize) -> Self {
        Self {
            intra_threads: intra_threads.max(1),
        }
    }
}

/// Accelerated providers compiled into this build, best first
fn accelerated_providers() -> Vec<(&'static str, ExecutionProviderDispatch)> {
    #[allow(unused_mut)]
    let mut providers: Vec<(&'static str, ExecutionProviderDispatch)> = Vec::new();

    #[cfg(feature = "tensorrt")]
    providers.push(("TensorRT", TensorRTExecutionProvider::default().build()));

    #[cfg(feature = "cuda")]
    providers.push(("CUDA", CUDAExecutionProvider::default().build()));

    #[cfg(all(target_os = "macos", feature = "coreml"))]
    providers.push(("CoreML", CoreMLExecutionProvider::default().build()));

    #[cfg(all(target_os = "windows", feature = "directml"))]
    providers.push(("DirectML", DirectMLExecutionProvider::default().build()));

    #[cfg(feature = "openvino")]
    providers.push((
        "OpenVINO-CPU",
        OpenVINOExecutionProvider::default().with_device_type("CPU").build(),
    ));

    providers
}

fn commit(
    provider: ExecutionProviderDispatch,
    threads: ThreadConfig,
    model_bytes: &[u8],
    directml: bool,
) -> ort::Result<Session> {
    let mut builder = Session::builder()?.with_execution_providers([provider])?;

    // DirectML requires sequential execution and no memory pattern
    builder = if directml {
        builder
            .with_parallel_execution(false)?
            .with_memory_pattern(false)?
            .with_optimization_level(GraphOptimizationLevel::Level1)?
    } else {
        builder.with_optimization_level(GraphOptimizationLevel::Level3)?
    };

    builder
        .with_intra_threads(threads.intra_threads)?
        .with_inter_threads(1)?
        .commit_from_memory(model_bytes)
}

/// Build an ONNX Runtime session, preferring hardware acceleration.
///
/// `forced_backend` (from `INFERENCE_BACKEND`) restricts the choice to one provider.
///
/// # Returns
/// (backend_name, Session)
pub fn build_session_with_acceleration(
    model_bytes: &[u8],
    model_name: &str,
    threads: ThreadConfig,
    forced_backend: Option<&str>,
) -> Result<(String, Session)> {
    let model_size_mb = model_bytes.len() as f64 / 1_048_576.0;

    if let Some(forced) = forced_backend {
        info!("INFERENCE_BACKEND={}, forcing specific backend for {}", forced, model_name);
        return build_forced(forced, model_bytes, model_name, threads);
    }

    for (backend, provider) in accelerated_providers() {
        match commit(provider, threads, model_bytes, backend == "DirectML") {
            Ok(session) => {
                info!("✓ Using {} acceleration for {}", backend, model_name);
                return Ok((backend.to_string(), session));
            }
            Err(e) => debug!("{} unavailable for {}: {}", backend, model_name, e),
        }
    }

    let session = commit(
        CPUExecutionProvider::default().build(),
        threads,
        model_bytes,
        false,
    )
    .with_context(|| {
        format!(
            "Failed to load {} ONNX model from memory ({:.1} MB). \
            This usually indicates:\n  \
            1. Model file corruption during download\n  \
            2. ONNX Runtime version/platform mismatch\n  \
            3. Model created with incompatible ONNX opset version",
            model_name, model_size_mb
        )
    })?;

    warn!("⚠️  Using CPU-only inference for {} (no GPU acceleration available)", model_name);
    Ok(("CPU".to_string(), session))
}

fn build_forced(
    backend: &str,
    model_bytes: &[u8],
    model_name: &str,
    threads: ThreadConfig,
) -> Result<(String, Session)> {
    let wanted = backend.to_lowercase();

    if wanted == "cpu" {
        let session = commit(CPUExecutionProvider::default().build(), threads, model_bytes, false)
            .with_context(|| format!("Failed to load {} with CPU", model_name))?;
        info!("✓ Forced CPU backend for {}", model_name);
        return Ok(("CPU".to_string(), session));
    }

    for (name, provider) in accelerated_providers() {
        if name.to_lowercase().starts_with(&wanted) {
            let session = commit(provider, threads, model_bytes, name == "DirectML")
                .with_context(|| format!("Failed to load {} with {}", model_name, name))?;
            info!("✓ Forced {} backend for {}", name, model_name);
            return Ok((name.to_string(), session));
        }
    }

    if !accelerated_providers().is_empty() {
        bail!(
            "Backend '{}' is not compiled into this build (enable the matching Cargo feature)",
            backend
        );
    }

    warn!("Unknown backend '{}', falling back to auto-detection for {}", backend, model_name);
    build_session_with_acceleration(model_bytes, model_name, threads, None)
}
