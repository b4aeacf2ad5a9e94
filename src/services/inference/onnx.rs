// ONNX Runtime implementation of the segmentation capability

use anyhow::{bail, Context, Result};
use image::imageops::FilterType;
use image::{GrayImage, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

use super::{InferenceProvider, SegmentationSession};
use crate::core::config::Config;
use crate::services::catalog::{MaskActivation, ModelDescriptor};
use crate::services::model_store::ModelStore;
use crate::services::onnx_builder::{self, ThreadConfig};

/// Loads catalog models from the model store into ONNX Runtime sessions
pub struct OnnxProvider {
    store: ModelStore,
    backend: Option<String>,
    threads: ThreadConfig,
}

impl OnnxProvider {
    pub fn new(store: ModelStore, backend: Option<String>, intra_threads: usize) -> Self {
        Self {
            store,
            backend,
            threads: ThreadConfig::new(intra_threads),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ModelStore::new(&config.models.models_dir, config.models.download_base_url.clone()),
            config.models.inference_backend.clone(),
            config.models.intra_threads,
        )
    }
}

impl InferenceProvider for OnnxProvider {
    #[instrument(skip(self, descriptor), fields(model = descriptor.id))]
    fn load(&self, descriptor: &'static ModelDescriptor) -> Result<Arc<dyn SegmentationSession>> {
        let path = self.store.resolve(descriptor)?;
        let model_bytes = std::fs::read(&path)
            .with_context(|| format!("Failed to read model file {}", path.display()))?;
        info!(
            "Loaded {} weights ({:.1} MB)",
            descriptor.id,
            model_bytes.len() as f64 / 1_048_576.0
        );

        let (backend, session) = onnx_builder::build_session_with_acceleration(
            &model_bytes,
            descriptor.id,
            self.threads,
            self.backend.as_deref(),
        )?;
        drop(model_bytes);

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("Model declares no inputs")?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .context("Model declares no outputs")?;

        debug!(
            "{} session ready on {} (input '{}', output '{}')",
            descriptor.id, backend, input_name, output_name
        );

        Ok(Arc::new(OnnxSession {
            descriptor,
            session: Mutex::new(session),
            input_name,
            output_name,
        }))
    }

    fn name(&self) -> &str {
        "onnxruntime"
    }
}

/// One ONNX Runtime session; runs are serialized, ORT parallelizes inside each run
pub struct OnnxSession {
    descriptor: &'static ModelDescriptor,
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl SegmentationSession for OnnxSession {
    fn model_id(&self) -> &str {
        self.descriptor.id
    }

    fn predict_mask(&self, image: &RgbImage) -> Result<GrayImage> {
        let start = Instant::now();
        let input = preprocess(image, self.descriptor);
        let input_value = ort::value::Value::from_array(input)?;

        let (dims, data) = {
            let mut session = self.session.lock();
            let outputs = session.run(ort::inputs![self.input_name.as_str() => input_value])?;
            let (shape, data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
            (shape.iter().copied().collect::<Vec<i64>>(), data.to_vec())
        };

        let (channels, height, width) = output_layout(&dims)?;
        if data.len() < channels * height * width {
            bail!("Output tensor holds {} values for shape {:?}", data.len(), dims);
        }
        let mask = activate(&data, channels, height, width, self.descriptor.activation);

        debug!(
            "{} inference: {}x{} mask in {:.2}ms",
            self.descriptor.id,
            width,
            height,
            start.elapsed().as_secs_f64() * 1000.0
        );

        let mask = GrayImage::from_raw(width as u32, height as u32, mask)
            .context("Mask buffer does not match output shape")?;
        Ok(image::imageops::resize(
            &mask,
            image.width(),
            image.height(),
            FilterType::Lanczos3,
        ))
    }
}

/// Resize to the model resolution and normalize into an NCHW tensor
fn preprocess(image: &RgbImage, descriptor: &ModelDescriptor) -> Array4<f32> {
    let size = descriptor.input_size;
    let resized = image::imageops::resize(image, size, size, FilterType::Lanczos3);

    let max = resized.as_raw().iter().copied().max().unwrap_or(0).max(1) as f32;

    let side = size as usize;
    let mut array = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            let value = pixel[c] as f32 / max;
            array[[0, c, y as usize, x as usize]] =
                (value - descriptor.mean[c]) / descriptor.std[c];
        }
    }
    array
}

/// (channels, height, width) of a segmentation output tensor
fn output_layout(dims: &[i64]) -> Result<(usize, usize, usize)> {
    let (channels, height, width) = match dims {
        [_, c, h, w] => (*c, *h, *w),
        [c, h, w] => (*c, *h, *w),
        [h, w] => (1, *h, *w),
        _ => bail!("Unexpected output shape {:?}", dims),
    };
    if channels < 1 || height < 1 || width < 1 {
        bail!("Unexpected output shape {:?}", dims);
    }
    Ok((channels as usize, height as usize, width as usize))
}

/// Convert raw network output into an 8-bit foreground mask
fn activate(
    data: &[f32],
    channels: usize,
    height: usize,
    width: usize,
    activation: MaskActivation,
) -> Vec<u8> {
    let plane = height * width;

    match activation {
        MaskActivation::MinMax => min_max(&data[..plane]),
        MaskActivation::SigmoidMinMax => {
            let sigmoid: Vec<f32> = data[..plane]
                .iter()
                .map(|v| 1.0 / (1.0 + (-v).exp()))
                .collect();
            min_max(&sigmoid)
        }
        MaskActivation::ArgmaxForeground => (0..plane)
            .map(|i| {
                let mut best = 0;
                for c in 1..channels {
                    if data[c * plane + i] > data[best * plane + i] {
                        best = c;
                    }
                }
                // Channel 0 is background
                if best == 0 {
                    0
                } else {
                    255
                }
            })
            .collect(),
    }
}

fn min_max(values: &[f32]) -> Vec<u8> {
    let (min, max) = values
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = (max - min).max(f32::EPSILON);
    values
        .iter()
        .map(|&v| (((v - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::ModelCatalog;
    use image::Rgb;

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let descriptor = ModelCatalog::builtin().descriptor_for("isnet-general-use").unwrap();
        let image = RgbImage::from_pixel(10, 6, Rgb([200, 200, 200]));

        let tensor = preprocess(&image, descriptor);
        assert_eq!(tensor.shape(), &[1, 3, 1024, 1024]);

        // Uniform image normalizes to 1.0 before mean/std: (1.0 - 0.5) / 1.0
        assert!((tensor[[0, 0, 0, 0]] - 0.5).abs() < 1e-5);
        assert!((tensor[[0, 2, 1023, 1023]] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_preprocess_black_image_does_not_divide_by_zero() {
        let descriptor = ModelCatalog::builtin().descriptor_for("u2net").unwrap();
        let tensor = preprocess(&RgbImage::new(4, 4), descriptor);
        assert!(tensor.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_output_layout() {
        assert_eq!(output_layout(&[1, 1, 320, 320]).unwrap(), (1, 320, 320));
        assert_eq!(output_layout(&[1, 4, 768, 768]).unwrap(), (4, 768, 768));
        assert_eq!(output_layout(&[64, 32]).unwrap(), (1, 64, 32));
        assert!(output_layout(&[1]).is_err());
        assert!(output_layout(&[1, 0, 4, 4]).is_err());
    }

    #[test]
    fn test_min_max_activation_spans_full_range() {
        let mask = activate(&[0.2, 0.4, 0.6, 0.8], 1, 2, 2, MaskActivation::MinMax);
        assert_eq!(mask[0], 0);
        assert_eq!(mask[3], 255);
        assert!(mask[1] < mask[2]);
    }

    #[test]
    fn test_min_max_activation_uses_first_channel_only() {
        // Second side output would flip the mask if it were read
        let data = [0.0, 1.0, 1.0, 0.0];
        let mask = activate(&data, 2, 1, 2, MaskActivation::MinMax);
        assert_eq!(mask, vec![0, 255]);
    }

    #[test]
    fn test_sigmoid_activation() {
        let mask = activate(&[-6.0, 0.0, 6.0], 1, 1, 3, MaskActivation::SigmoidMinMax);
        assert_eq!(mask[0], 0);
        assert_eq!(mask[2], 255);
        assert!((120..=135).contains(&mask[1]));
    }

    #[test]
    fn test_argmax_activation_marks_non_background_classes() {
        // 3 channels over 3 pixels: background wins, class 1 wins, class 2 wins
        let data = [
            0.9, 0.1, 0.1, // background
            0.05, 0.8, 0.2, // upper body
            0.05, 0.1, 0.7, // lower body
        ];
        let mask = activate(&data, 3, 1, 3, MaskActivation::ArgmaxForeground);
        assert_eq!(mask, vec![0, 255, 255]);
    }

    #[test]
    fn test_constant_output_does_not_produce_nan() {
        let mask = activate(&[0.5; 4], 1, 2, 2, MaskActivation::MinMax);
        assert_eq!(mask, vec![0; 4]);
    }
}
