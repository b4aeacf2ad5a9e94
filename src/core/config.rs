use crate::core::errors::ConfigError;
use crate::services::catalog::ModelCatalog;
use std::env;
use std::str::FromStr;
use tracing::Level;

/// Default upload limit enforced before inference (10 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Base URL the reference runtime publishes its ONNX weights under
pub const DEFAULT_MODEL_DOWNLOAD_URL: &str =
    "https://github.com/danielgatis/rembg/releases/download/v0.0.0";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// When model sessions are created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadMode {
    /// Sessions are created on first use
    Lazy,
    /// The default model (and `PRELOAD_MODELS`) are loaded at startup
    Eager,
}

impl FromStr for PreloadMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lazy" => Ok(PreloadMode::Lazy),
            "eager" => Ok(PreloadMode::Eager),
            other => Err(ConfigError::InvalidPreloadMode(other.to_string())),
        }
    }
}

/// Model loading configuration
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub default_model: String,
    pub models_dir: String,
    pub preload: PreloadMode,
    pub preload_models: Vec<String>,
    /// Substitute the default model when a non-default model fails to load
    pub fallback_on_load_failure: bool,
    /// None disables downloading missing weights
    pub download_base_url: Option<String>,
    pub inference_backend: Option<String>,
    pub intra_threads: usize,
}

/// Request processing configuration
#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub max_upload_bytes: usize,
    pub jpeg_quality: u8,
    pub backdrop_color: [u8; 3],
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub models: ModelConfig,
    pub processing: ProcessingConfig,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build and validate a configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::load(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Convenience for tests: configuration from a fixed set of variables
    pub fn from_vars(vars: &[(&str, &str)]) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| {
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
        })
    }

    fn load<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Parse log level
        let log_level = lookup("LOG_LEVEL")
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let preload_models = lookup("PRELOAD_MODELS")
            .map(|models| {
                models
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let download_base_url = match lookup("MODEL_DOWNLOAD_URL") {
            Some(url) if url.trim().is_empty() => None,
            Some(url) => Some(url.trim().trim_end_matches('/').to_string()),
            None => Some(DEFAULT_MODEL_DOWNLOAD_URL.to_string()),
        };

        let backdrop = lookup("BACKDROP_COLOR").unwrap_or_else(|| "#FFFFFF".to_string());

        Ok(Self {
            server: ServerConfig {
                port: parse_or(lookup, "PORT", 8000)?,
                host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                log_level,
            },
            models: ModelConfig {
                default_model: lookup("DEFAULT_MODEL").unwrap_or_else(|| "u2net".to_string()),
                models_dir: lookup("MODELS_DIR").unwrap_or_else(|| "models".to_string()),
                preload: lookup("MODEL_PRELOAD")
                    .map(|s| s.parse::<PreloadMode>())
                    .transpose()?
                    .unwrap_or(PreloadMode::Lazy),
                preload_models,
                fallback_on_load_failure: parse_or(lookup, "MODEL_FALLBACK", true)?,
                download_base_url,
                inference_backend: lookup("INFERENCE_BACKEND")
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty() && s != "auto"),
                intra_threads: parse_or(lookup, "INTRA_THREADS", num_cpus::get().max(1))?,
            },
            processing: ProcessingConfig {
                max_upload_bytes: parse_or(lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
                jpeg_quality: parse_or(lookup, "JPEG_QUALITY", 95)?,
                backdrop_color: parse_hex_color(&backdrop)?,
            },
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let catalog = ModelCatalog::builtin();

        if !catalog.contains(&self.models.default_model) {
            return Err(ConfigError::UnknownDefaultModel(
                self.models.default_model.clone(),
            ));
        }

        if let Some(unknown) = self
            .models
            .preload_models
            .iter()
            .find(|id| !catalog.contains(id))
        {
            return Err(ConfigError::UnknownPreloadModel(unknown.clone()));
        }

        if !(1..=100).contains(&self.processing.jpeg_quality) {
            return Err(ConfigError::InvalidJpegQuality(self.processing.jpeg_quality));
        }

        if self.processing.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidUploadLimit);
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn default_model(&self) -> &str {
        &self.models.default_model
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.processing.max_upload_bytes
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.processing.jpeg_quality
    }

    pub fn backdrop_color(&self) -> [u8; 3] {
        self.processing.backdrop_color
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::EnvVarError {
            name: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

fn parse_hex_color(value: &str) -> Result<[u8; 3], ConfigError> {
    let invalid = || ConfigError::InvalidBackdropColor(value.to_string());
    let hex = value.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(invalid());
    }

    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&hex[range], 16).map_err(|_| invalid())
    };
    Ok([channel(0..2)?, channel(2..4)?, channel(4..6)?])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&[]).unwrap();
        assert_eq!(config.server_port(), 8000);
        assert_eq!(config.server_host(), "0.0.0.0");
        assert_eq!(config.default_model(), "u2net");
        assert_eq!(config.max_upload_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.jpeg_quality(), 95);
        assert_eq!(config.backdrop_color(), [255, 255, 255]);
        assert_eq!(config.models.preload, PreloadMode::Lazy);
        assert!(config.models.fallback_on_load_failure);
        assert_eq!(
            config.models.download_base_url.as_deref(),
            Some(DEFAULT_MODEL_DOWNLOAD_URL)
        );
        assert!(config.models.inference_backend.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_vars(&[
            ("PORT", "8080"),
            ("DEFAULT_MODEL", "silueta"),
            ("MODEL_PRELOAD", "Eager"),
            ("PRELOAD_MODELS", "u2net, isnet-general-use,"),
            ("MODEL_FALLBACK", "false"),
            ("MODEL_DOWNLOAD_URL", ""),
            ("INFERENCE_BACKEND", "CPU"),
            ("BACKDROP_COLOR", "#10ff00"),
            ("LOG_LEVEL", "debug"),
        ])
        .unwrap();

        assert_eq!(config.server_port(), 8080);
        assert_eq!(config.default_model(), "silueta");
        assert_eq!(config.models.preload, PreloadMode::Eager);
        assert_eq!(config.models.preload_models, vec!["u2net", "isnet-general-use"]);
        assert!(!config.models.fallback_on_load_failure);
        assert!(config.models.download_base_url.is_none());
        assert_eq!(config.models.inference_backend.as_deref(), Some("cpu"));
        assert_eq!(config.backdrop_color(), [0x10, 0xff, 0x00]);
        assert_eq!(config.log_level(), Level::DEBUG);
    }

    #[test]
    fn test_rejects_unknown_default_model() {
        let err = Config::from_vars(&[("DEFAULT_MODEL", "does-not-exist")]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDefaultModel(_)));
    }

    #[test]
    fn test_rejects_unknown_preload_model() {
        let err = Config::from_vars(&[("PRELOAD_MODELS", "u2net,mystery")]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPreloadModel(ref id) if id == "mystery"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            Config::from_vars(&[("PORT", "eighty")]).unwrap_err(),
            ConfigError::EnvVarError { .. }
        ));
        assert!(matches!(
            Config::from_vars(&[("JPEG_QUALITY", "0")]).unwrap_err(),
            ConfigError::InvalidJpegQuality(0)
        ));
        assert!(matches!(
            Config::from_vars(&[("MAX_UPLOAD_BYTES", "0")]).unwrap_err(),
            ConfigError::InvalidUploadLimit
        ));
        assert!(matches!(
            Config::from_vars(&[("MODEL_PRELOAD", "sometimes")]).unwrap_err(),
            ConfigError::InvalidPreloadMode(_)
        ));
        assert!(matches!(
            Config::from_vars(&[("BACKDROP_COLOR", "white")]).unwrap_err(),
            ConfigError::InvalidBackdropColor(_)
        ));
    }
}
