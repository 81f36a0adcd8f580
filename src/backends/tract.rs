//! Tract inference backend
//!
//! Pure Rust, CPU only. Slower than ONNX Runtime but has no native
//! dependencies.

use crate::config::RemovalConfig;
use crate::error::{RembgError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use instant::{Duration, Instant};
use ndarray::Array4;
use tract_onnx::prelude::*;

type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend for running segmentation models
#[derive(Debug)]
pub struct TractBackend {
    model: Option<TractModel>,
    model_manager: ModelManager,
    model_info: Option<ModelInfo>,
}

impl TractBackend {
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            model: None,
            model_manager,
            model_info: None,
        }
    }

    fn load_model(&mut self) -> Result<Duration> {
        let model_load_start = Instant::now();

        let model_data = self.model_manager.load_model()?;
        let model_info = self.model_manager.get_info()?;

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| RembgError::model(format!("Failed to load ONNX model: {e}")))?
            .into_optimized()
            .map_err(|e| RembgError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| RembgError::model(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(model);

        let model_load_time = model_load_start.elapsed();
        tracing::info!(
            model = %model_info.name,
            load_ms = model_load_time.as_millis() as u64,
            "Tract model loaded"
        );
        self.model_info = Some(model_info);

        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }
        if config.intra_threads > 0 || config.inter_threads > 0 {
            tracing::debug!("Thread settings are ignored by the Tract backend");
        }
        self.load_model().map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| RembgError::internal("Backend not initialized"))?;

        let inference_start = Instant::now();
        let outputs = model
            .run(tvec![Tensor::from(input.clone()).into()])
            .map_err(|e| RembgError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| RembgError::inference("No output tensor found"))?
            .into_arc_tensor();
        let output_data = output_tensor
            .to_array_view::<f32>()
            .map_err(|e| RembgError::inference(format!("Failed to convert output tensor: {e}")))?;

        let shape = output_data.shape().to_vec();
        let [batch, channels, height, width] = shape.as_slice() else {
            return Err(RembgError::inference(format!(
                "Expected 4D output tensor, got {}D",
                shape.len()
            )));
        };
        let output_array = Array4::from_shape_vec(
            (*batch, *channels, *height, *width),
            output_data.to_owned().into_raw_vec_and_offset().0,
        )
        .map_err(|e| RembgError::inference(format!("Failed to reshape output tensor: {e}")))?;

        tracing::debug!(
            inference_ms = inference_start.elapsed().as_secs_f64() * 1000.0,
            "Tract inference complete"
        );
        Ok(output_array)
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info
            .as_ref()
            .map_or((1, 3, 1024, 1024), |info| info.input_shape)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info
            .as_ref()
            .map_or((1, 1, 1024, 1024), |info| info.output_shape)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.model_manager.get_preprocessing_config()
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        self.model_manager.get_info()
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }
}
