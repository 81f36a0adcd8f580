//! Letterbox preprocessing into model input tensors

use crate::{
    error::{RembgError, Result},
    models::PreprocessingConfig,
};
use image::{imageops::FilterType, DynamicImage, ImageBuffer, Rgb, RgbImage};
use ndarray::Array4;

/// Padding color around the letterboxed image
const PADDING_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Where the original image ended up inside the model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Factor applied to the original dimensions
    pub scale: f32,
    /// Horizontal padding before the image starts
    pub offset_x: u32,
    /// Vertical padding before the image starts
    pub offset_y: u32,
    /// Scaled image width inside the canvas
    pub content_width: u32,
    /// Scaled image height inside the canvas
    pub content_height: u32,
}

impl Letterbox {
    /// Fit `width` x `height` into `target_width` x `target_height` preserving aspect ratio
    ///
    /// # Errors
    /// - Zero-sized source image
    pub fn fit(width: u32, height: u32, target_width: u32, target_height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RembgError::processing("Image has zero width or height"));
        }

        let scale = (target_width as f32 / width as f32).min(target_height as f32 / height as f32);
        let content_width = ((width as f32 * scale).round() as u32).clamp(1, target_width);
        let content_height = ((height as f32 * scale).round() as u32).clamp(1, target_height);

        Ok(Self {
            scale,
            offset_x: (target_width - content_width) / 2,
            offset_y: (target_height - content_height) / 2,
            content_width,
            content_height,
        })
    }
}

pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Letterbox `image` to the model size and normalize it into an NCHW tensor
    ///
    /// # Errors
    /// - Zero-sized image
    /// - Model size of zero
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<(Array4<f32>, Letterbox)> {
        let [target_height, target_width] = preprocessing_config.target_size;
        if target_width == 0 || target_height == 0 {
            return Err(RembgError::invalid_config("Model input size must be non-zero"));
        }

        let rgb_image = image.to_rgb8();
        let (orig_width, orig_height) = rgb_image.dimensions();
        let letterbox = Letterbox::fit(orig_width, orig_height, target_width, target_height)?;

        let resized = image::imageops::resize(
            &rgb_image,
            letterbox.content_width,
            letterbox.content_height,
            FilterType::Triangle,
        );

        let mut canvas = ImageBuffer::from_pixel(target_width, target_height, PADDING_COLOR);
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(letterbox.offset_x),
            i64::from(letterbox.offset_y),
        );

        Ok((Self::canvas_to_tensor(&canvas, preprocessing_config), letterbox))
    }

    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mean = config.normalization_mean;
        let std = config.normalization_std;

        Array4::from_shape_fn(
            (1, 3, height as usize, width as usize),
            |(_, channel, y, x)| {
                let value = canvas.get_pixel(x as u32, y as u32)[channel];
                (f32::from(value) / 255.0 - mean[channel]) / std[channel]
            },
        )
    }
}
