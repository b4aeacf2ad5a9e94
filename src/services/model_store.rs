// On-disk model weights, fetched once on first use

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::services::catalog::ModelDescriptor;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Resolves catalog models to `.onnx` files under the models directory
#[derive(Debug, Clone)]
pub struct ModelStore {
    models_dir: PathBuf,
    download_base_url: Option<String>,
}

impl ModelStore {
    pub fn new(models_dir: impl Into<PathBuf>, download_base_url: Option<String>) -> Self {
        Self {
            models_dir: models_dir.into(),
            download_base_url,
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Location a model's weights are stored at, whether present or not
    pub fn path_for(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.models_dir.join(descriptor.file_name)
    }

    /// Path to the model's weights, downloading them when missing.
    ///
    /// Blocking; call from the blocking pool.
    pub fn resolve(&self, descriptor: &ModelDescriptor) -> Result<PathBuf> {
        let path = self.path_for(descriptor);
        if path.is_file() {
            return Ok(path);
        }

        let Some(base_url) = &self.download_base_url else {
            bail!(
                "Model file {} not found and downloading is disabled (MODEL_DOWNLOAD_URL is empty)",
                path.display()
            );
        };

        let url = format!("{}/{}", base_url, descriptor.file_name);
        self.download(&url, &path)
            .with_context(|| format!("Failed to download {} from {}", descriptor.id, url))?;
        Ok(path)
    }

    fn download(&self, url: &str, path: &Path) -> Result<()> {
        fs::create_dir_all(&self.models_dir).with_context(|| {
            format!("Failed to create models directory {}", self.models_dir.display())
        })?;

        info!("📥 Downloading {} -> {}", url, path.display());
        let start = Instant::now();

        let client = reqwest::blocking::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        let response = client.get(url).send()?.error_for_status()?;
        let bytes = response.bytes()?;

        write_atomically(path, &bytes)?;

        info!(
            "✓ Downloaded {:.1} MB in {:.1}s",
            bytes.len() as f64 / 1_048_576.0,
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

/// Write through a sibling `.onnx.part` file so a partial download never looks complete.
/// The temp file is removed on every failure path.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("onnx.part");

    let written = fs::File::create(&tmp_path)
        .with_context(|| format!("Failed to create {}", tmp_path.display()))
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()?;
            Ok(())
        })
        .and_then(|()| {
            fs::rename(&tmp_path, path).with_context(|| {
                format!("Failed to move downloaded model into {}", path.display())
            })
        });

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        warn!("Discarded partial model file {}: {:#}", tmp_path.display(), e);
        return Err(e);
    }
    Ok(())
}
