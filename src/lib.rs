// Library exports for the background removal service

pub mod api;
pub mod core;
pub mod orchestration;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use crate::core::{
    config::Config,
    errors::{ConfigError, ModelLoadError, PipelineError},
    types::{OutputFormat, ProcessedImage, ProcessingRequest},
};

pub use api::{create_router, AppState};

pub use orchestration::{BackgroundRemovalService, RequestPipeline};

pub use services::{InferenceProvider, ModelCatalog, OnnxProvider, SegmentationSession, SessionCache};

pub use utils::{Metrics, ReclaimScope};
