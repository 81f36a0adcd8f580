//! Image decoding, encoding and resizing for the request pipeline

use crate::error::{RembgError, Result};
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageEncoder, ImageFormat, RgbImage};
use std::io::Cursor;

/// Stateless codec helpers
pub struct ImageCodec;

impl ImageCodec {
    /// Decode any supported format and convert to 8-bit RGB
    ///
    /// The format is sniffed from the content, never from a filename.
    ///
    /// # Errors
    /// - Empty input
    /// - Unknown or corrupt image data
    pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
        if bytes.is_empty() {
            return Err(RembgError::processing("cannot decode an empty upload"));
        }
        let image = image::load_from_memory(bytes)?;
        Ok(image.to_rgb8())
    }

    /// Encode as PNG with the encoder's default settings
    ///
    /// # Errors
    /// - Encoder failure
    pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
        Ok(buffer)
    }

    /// Encode as PNG with maximum compression and adaptive row filtering
    ///
    /// Still lossless; only the byte size changes.
    ///
    /// # Errors
    /// - Encoder failure
    pub fn encode_png_optimized(image: &DynamicImage) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let encoder =
            PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, PngFilterType::Adaptive);
        encoder.write_image(
            image.as_bytes(),
            image.width(),
            image.height(),
            image.color().into(),
        )?;
        Ok(buffer)
    }

    /// Resize to exactly `width` x `height`, ignoring aspect ratio (bicubic)
    #[must_use]
    pub fn resize_exact(image: &RgbImage, width: u32, height: u32) -> RgbImage {
        image::imageops::resize(image, width, height, FilterType::CatmullRom)
    }
}
