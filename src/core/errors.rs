// Error types for the background removal service
//
// Component errors (catalog, model loading, inference, compositing) are folded into
// PipelineError, whose variants map one-to-one onto the HTTP status the API returns.

use thiserror::Error;

/// Model catalog lookup errors
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Model '{requested}' is not supported. Available models: {available:?}")]
    UnknownModel {
        requested: String,
        available: Vec<String>,
    },
}

/// Session creation failed for a model
#[derive(Debug, Clone, Error)]
#[error("Failed to initialize model {model_id}: {cause}")]
pub struct ModelLoadError {
    pub model_id: String,
    pub cause: String,
}

impl ModelLoadError {
    pub fn new(model_id: impl Into<String>, cause: impl ToString) -> Self {
        Self {
            model_id: model_id.into(),
            cause: cause.to_string(),
        }
    }
}

/// Inference engine errors
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Image decoding failed: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Segmentation failed: {0}")]
    Runtime(String),

    #[error("Mask has invalid dimensions {mask_width}x{mask_height} for a {width}x{height} image")]
    InvalidMask {
        width: u32,
        height: u32,
        mask_width: u32,
        mask_height: u32,
    },

    #[error("Image encoding failed: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Inference task aborted: {0}")]
    Aborted(String),
}

/// Compositor errors
#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("Image decoding failed: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Image has no alpha channel (color type {0})")]
    MissingAlpha(String),

    #[error("JPEG encoding failed: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Composite task aborted: {0}")]
    Aborted(String),
}

/// Pipeline stage in which a processing error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    Inference,
    Composite,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::Inference => write!(f, "inference"),
            ProcessingStage::Composite => write!(f, "composite"),
        }
    }
}

/// Request pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(#[source] ModelLoadError),

    #[error("Processing error during {stage}: {cause}")]
    ProcessingError {
        stage: ProcessingStage,
        cause: String,
    },
}

impl PipelineError {
    pub fn invalid_input(field: &'static str, message: impl Into<String>) -> Self {
        PipelineError::InvalidInput {
            field,
            message: message.into(),
        }
    }

    /// Short label used for logging and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput { .. } => "invalid_input",
            PipelineError::ServiceUnavailable(_) => "service_unavailable",
            PipelineError::ProcessingError { .. } => "processing_error",
        }
    }
}

impl From<CatalogError> for PipelineError {
    fn from(err: CatalogError) -> Self {
        PipelineError::invalid_input("model", err.to_string())
    }
}

impl From<InferenceError> for PipelineError {
    fn from(err: InferenceError) -> Self {
        PipelineError::ProcessingError {
            stage: ProcessingStage::Inference,
            cause: err.to_string(),
        }
    }
}

impl From<CompositeError> for PipelineError {
    fn from(err: CompositeError) -> Self {
        PipelineError::ProcessingError {
            stage: ProcessingStage::Composite,
            cause: err.to_string(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Default model '{0}' is not in the model catalog")]
    UnknownDefaultModel(String),

    #[error("Preload model '{0}' is not in the model catalog")]
    UnknownPreloadModel(String),

    #[error("Invalid preload mode '{0}' (expected 'eager' or 'lazy')")]
    InvalidPreloadMode(String),

    #[error("JPEG quality must be in [1, 100], got {0}")]
    InvalidJpegQuality(u8),

    #[error("Max upload size must be > 0")]
    InvalidUploadLimit,

    #[error("Invalid backdrop color '{0}' (expected #RRGGBB)")]
    InvalidBackdropColor(String),

    #[error("Environment variable {name} has an invalid value: {value}")]
    EnvVarError { name: String, value: String },
}

pub type PipelineResult<T> = Result<T, PipelineError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
