//! The `/rembg` processing pipeline
//!
//! upload bytes → RGB → PNG → background remover → RGB → 224x224 → optimized PNG

use crate::config::OUTPUT_SIZE;
use crate::error::Result;
use crate::processor::BackgroundRemovalProcessor;
use crate::services::ImageCodec;
use image::DynamicImage;
use std::sync::{Arc, Mutex, PoisonError};

/// Turns an encoded image into an encoded RGBA PNG with the background removed
///
/// Background pixels come back as `(0, 0, 0, 0)`; partially transparent
/// pixels have their color scaled by alpha.
pub trait BackgroundRemover: Send + Sync {
    /// # Errors
    /// - Undecodable input
    /// - Model or inference failures
    fn remove(&self, encoded: &[u8]) -> Result<Vec<u8>>;
}

/// [`BackgroundRemover`] over a shared [`BackgroundRemovalProcessor`]
///
/// The inference session needs exclusive access while it runs, so calls are
/// serialized through a mutex.
#[derive(Debug)]
pub struct ProcessorRemover {
    processor: Mutex<BackgroundRemovalProcessor>,
}

impl ProcessorRemover {
    #[must_use]
    pub fn new(processor: BackgroundRemovalProcessor) -> Self {
        Self {
            processor: Mutex::new(processor),
        }
    }

    /// Load the model ahead of the first request
    ///
    /// # Errors
    /// - Any initialization error of the processor
    pub fn initialize(&self) -> Result<()> {
        self.processor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .initialize()
    }
}

impl BackgroundRemover for ProcessorRemover {
    fn remove(&self, encoded: &[u8]) -> Result<Vec<u8>> {
        // A panic in an earlier request leaves the processor usable.
        let cutout = self
            .processor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .process_bytes(encoded)?;
        ImageCodec::encode_png(&DynamicImage::ImageRgba8(cutout))
    }
}

/// Fixed six-step pipeline behind `POST /rembg`
#[derive(Clone)]
pub struct RembgPipeline {
    remover: Arc<dyn BackgroundRemover>,
    output_size: u32,
}

impl std::fmt::Debug for RembgPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RembgPipeline")
            .field("output_size", &self.output_size)
            .finish_non_exhaustive()
    }
}

impl RembgPipeline {
    #[must_use]
    pub fn new(remover: Arc<dyn BackgroundRemover>) -> Self {
        Self {
            remover,
            output_size: OUTPUT_SIZE,
        }
    }

    /// Run every step on one upload and return the response PNG
    ///
    /// The result is always an `OUTPUT_SIZE` x `OUTPUT_SIZE` RGB PNG. The
    /// background becomes black because the alpha channel is dropped.
    ///
    /// # Errors
    /// - The upload is empty or not a decodable image
    /// - The remover fails or returns an undecodable image
    /// - PNG encoding fails
    pub fn run(&self, upload: &[u8]) -> Result<Vec<u8>> {
        let input = ImageCodec::decode_rgb(upload)?;
        tracing::debug!(width = input.width(), height = input.height(), "Decoded upload");

        let normalized = ImageCodec::encode_png(&DynamicImage::ImageRgb8(input))?;
        let removed = self.remover.remove(&normalized)?;

        let cutout = ImageCodec::decode_rgb(&removed)?;
        let resized = ImageCodec::resize_exact(&cutout, self.output_size, self.output_size);

        ImageCodec::encode_png_optimized(&DynamicImage::ImageRgb8(resized))
    }
}
