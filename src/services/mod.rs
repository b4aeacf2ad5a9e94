pub mod catalog;
pub mod compositor;
pub mod inference;
pub mod model_store;
pub mod onnx_builder; // Shared ONNX session builder with acceleration probing
pub mod session_cache;

// Re-export commonly used services
pub use catalog::{MaskActivation, ModelCatalog, ModelDescriptor};
pub use compositor::Compositor;
pub use inference::{InferenceEngine, InferenceProvider, OnnxProvider, SegmentationSession};
pub use model_store::ModelStore;
pub use session_cache::SessionCache;
