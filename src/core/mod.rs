pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::{Config, PreloadMode};
pub use errors::{
    CatalogError, CompositeError, ConfigError, InferenceError, ModelLoadError, PipelineError,
    ProcessingStage,
};
pub use types::{OutputFormat, ProcessedImage, ProcessingRequest};
