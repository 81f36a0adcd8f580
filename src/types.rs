//! Mask and timing types produced by the processor

use crate::error::{RembgError, Result};
use image::{RgbImage, RgbaImage};

/// Grayscale segmentation mask, 255 = foreground
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    /// Mask data as grayscale values (0-255), row-major
    pub data: Vec<u8>,

    /// Mask dimensions (width, height)
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// Cut the foreground out of `image`
    ///
    /// Each output pixel is the source pixel blended over transparent black
    /// by the mask value: RGB is scaled by `mask / 255` and alpha is the mask.
    ///
    /// # Errors
    /// - Image and mask dimensions differ
    pub fn composite(&self, image: &RgbImage) -> Result<RgbaImage> {
        if image.dimensions() != self.dimensions {
            return Err(RembgError::processing(format!(
                "Image and mask dimensions do not match: {:?} vs {:?}",
                image.dimensions(),
                self.dimensions
            )));
        }
        if self.data.len() != image.pixels().len() {
            return Err(RembgError::processing("Mask data length does not match dimensions"));
        }

        let (width, height) = self.dimensions;
        let mut output = RgbaImage::new(width, height);
        for ((out, src), &alpha) in output.pixels_mut().zip(image.pixels()).zip(&self.data) {
            let scale = |c: u8| ((u16::from(c) * u16::from(alpha) + 127) / 255) as u8;
            *out = image::Rgba([scale(src[0]), scale(src[1]), scale(src[2]), alpha]);
        }
        Ok(output)
    }

    /// Share of pixels above the 50% threshold
    #[must_use]
    pub fn foreground_ratio(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let foreground = self.data.iter().filter(|&&v| v > 127).count();
        foreground as f32 / self.data.len() as f32
    }
}

/// Per-stage timings of a single processor run, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingTimings {
    /// Model loading time (first call only)
    pub model_load_ms: u64,
    /// Letterbox and tensor conversion
    pub preprocessing_ms: u64,
    /// Backend inference
    pub inference_ms: u64,
    /// Mask mapping and compositing
    pub postprocessing_ms: u64,
    pub total_ms: u64,
}

impl ProcessingTimings {
    /// Time not accounted for by the individual stages
    #[must_use]
    pub fn other_overhead_ms(&self) -> u64 {
        self.total_ms.saturating_sub(
            self.model_load_ms + self.preprocessing_ms + self.inference_ms + self.postprocessing_ms,
        )
    }
}
