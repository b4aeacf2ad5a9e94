use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageResult, RgbImage};
use std::io::Cursor;

/// Decode an image from memory, guessing the format from its content.
pub fn decode_image(bytes: &[u8]) -> ImageResult<DynamicImage> {
    image::load_from_memory(bytes)
}

/// Sniff the encoded format of a buffer without decoding it.
pub fn sniff_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// Encode an image as PNG bytes, keeping any alpha channel.
pub fn encode_png(img: &DynamicImage) -> ImageResult<Vec<u8>> {
    let mut png_bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)?;
    Ok(png_bytes)
}

/// Encode an opaque RGB image as JPEG with the given quality (1-100).
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> ImageResult<Vec<u8>> {
    let mut jpeg_bytes = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_bytes, quality.clamp(1, 100));
        encoder.encode_image(img)?;
    }
    Ok(jpeg_bytes)
}
