//! Inference backend abstraction

use crate::config::RemovalConfig;
use crate::error::Result;
use crate::models::{ModelInfo, PreprocessingConfig};
use instant::Duration;
use ndarray::Array4;

/// Trait for inference backends
///
/// Backends are moved into worker threads, so they must be `Send`.
pub trait InferenceBackend: Send {
    /// Load the model described by `config`
    ///
    /// Returns the model load time when the backend did work, `None` when it
    /// was already initialized.
    ///
    /// # Errors
    /// - Model resolution or loading failures
    /// - Execution provider setup failures
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>>;

    /// Run inference on an NCHW input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Unexpected output shape
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Expected input shape (NCHW)
    fn input_shape(&self) -> (usize, usize, usize, usize);

    /// Produced output shape (NCHW)
    fn output_shape(&self) -> (usize, usize, usize, usize);

    /// # Errors
    /// - Backend not initialized
    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig>;

    /// # Errors
    /// - Backend not initialized
    fn get_model_info(&self) -> Result<ModelInfo>;

    fn is_initialized(&self) -> bool;
}
