// Flattens a cutout onto a solid backdrop

use image::{Rgb, RgbImage};
use tracing::debug;

use crate::core::errors::CompositeError;
use crate::core::types::OutputFormat;
use crate::utils::{decode_image, describe_join_error, encode_jpeg};

/// Stateless; safe to share across requests
#[derive(Debug, Clone, Copy)]
pub struct Compositor {
    quality: u8,
}

impl Compositor {
    pub fn new(quality: u8) -> Self {
        Self { quality }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Blend a transparent image onto `backdrop` and encode it as JPEG.
    ///
    /// Every output pixel is `fg * a + backdrop * (1 - a)`.
    pub fn flatten(
        &self,
        image_bytes: &[u8],
        backdrop: [u8; 3],
    ) -> Result<(Vec<u8>, OutputFormat), CompositeError> {
        let img = decode_image(image_bytes).map_err(CompositeError::Decode)?;
        if !img.color().has_alpha() {
            return Err(CompositeError::MissingAlpha(format!("{:?}", img.color())));
        }

        let rgba = img.into_rgba8();
        let (width, height) = rgba.dimensions();

        let flattened = RgbImage::from_fn(width, height, |x, y| {
            let px = rgba.get_pixel(x, y);
            let alpha = px[3] as u32;
            let blend = |fg: u8, bg: u8| -> u8 {
                ((fg as u32 * alpha + bg as u32 * (255 - alpha) + 127) / 255) as u8
            };
            Rgb([
                blend(px[0], backdrop[0]),
                blend(px[1], backdrop[1]),
                blend(px[2], backdrop[2]),
            ])
        });
        drop(rgba);

        let jpeg = encode_jpeg(&flattened, self.quality).map_err(CompositeError::Encode)?;
        debug!(
            "Composited {}x{} image onto #{:02X}{:02X}{:02X} ({} bytes)",
            width,
            height,
            backdrop[0],
            backdrop[1],
            backdrop[2],
            jpeg.len()
        );

        Ok((jpeg, OutputFormat::Jpeg))
    }

    /// `flatten` on the blocking pool
    pub async fn flatten_async(
        &self,
        image_bytes: Vec<u8>,
        backdrop: [u8; 3],
    ) -> Result<(Vec<u8>, OutputFormat), CompositeError> {
        let compositor = *self;
        tokio::task::spawn_blocking(move || compositor.flatten(&image_bytes, backdrop))
            .await
            .map_err(|e| CompositeError::Aborted(describe_join_error(e)))?
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new(95)
    }
}
