pub mod pipeline;
pub mod service;

pub use pipeline::RequestPipeline;
pub use service::BackgroundRemovalService;
