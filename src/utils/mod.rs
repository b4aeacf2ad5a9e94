pub mod image_ops;
pub mod memory;
pub mod metrics;
pub mod tasks;

// Re-export commonly used items
pub use image_ops::{decode_image, encode_jpeg, encode_png, sniff_format};
pub use memory::{reclaim, ReclaimScope};
pub use metrics::{Metrics, MetricsSnapshot};
pub use tasks::describe_join_error;
