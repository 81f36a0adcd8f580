//! ONNX Runtime inference backend
//!
//! Supports the CPU, CUDA and `CoreML` execution providers. Providers that
//! are requested but unavailable fall back to CPU with a warning.

use crate::config::{ExecutionProvider, RemovalConfig};
use crate::error::{RembgError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use instant::{Duration, Instant};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;

/// ONNX Runtime backend for running segmentation models
#[derive(Debug)]
pub struct OnnxBackend {
    session: Option<Session>,
    model_manager: ModelManager,
    model_info: Option<ModelInfo>,
}

impl OnnxBackend {
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            session: None,
            model_manager,
            model_info: None,
        }
    }

    /// Provider names with their availability on this machine
    #[must_use]
    pub fn list_providers() -> Vec<(&'static str, bool)> {
        vec![
            ("cpu", true),
            (
                "cuda",
                OrtExecutionProvider::is_available(&CUDAExecutionProvider::default())
                    .unwrap_or(false),
            ),
            (
                "coreml",
                OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                    .unwrap_or(false),
            ),
        ]
    }

    fn execution_providers(provider: ExecutionProvider) -> Vec<ExecutionProviderDispatch> {
        let cuda_available =
            || OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available = || {
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false)
        };

        let mut providers = Vec::new();
        match provider {
            ExecutionProvider::Auto => {
                if cuda_available() {
                    providers.push(CUDAExecutionProvider::default().build());
                }
                if coreml_available() {
                    providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
                }
                if providers.is_empty() {
                    tracing::warn!("No hardware acceleration available, using CPU");
                }
            },
            ExecutionProvider::Cpu => {},
            ExecutionProvider::Cuda => {
                if cuda_available() {
                    providers.push(CUDAExecutionProvider::default().build());
                } else {
                    tracing::warn!("CUDA requested but not available, falling back to CPU");
                }
            },
            ExecutionProvider::CoreMl => {
                if coreml_available() {
                    providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
                } else {
                    tracing::warn!("CoreML requested but not available, falling back to CPU");
                }
            },
        }
        providers
    }

    fn load_model(&mut self, config: &RemovalConfig) -> Result<Duration> {
        let model_load_start = Instant::now();
        let model_data = self.model_manager.load_model()?;

        let session_error = |stage: &str| {
            let stage = stage.to_string();
            move |e: ort::Error| RembgError::inference(format!("{stage}: {e}"))
        };

        let mut session_builder = Session::builder()
            .map_err(session_error("Failed to create session builder"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(session_error("Failed to set optimization level"))?;

        let providers = Self::execution_providers(config.execution_provider);
        if !providers.is_empty() {
            session_builder = session_builder
                .with_execution_providers(providers)
                .map_err(session_error("Failed to set execution providers"))?;
        }

        let cores = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);
        let intra_threads = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            cores
        };
        let inter_threads = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (cores / 4).max(1)
        };

        let session = session_builder
            .with_parallel_execution(true)
            .map_err(session_error("Failed to enable parallel execution"))?
            .with_intra_threads(intra_threads)
            .map_err(session_error("Failed to set intra threads"))?
            .with_inter_threads(inter_threads)
            .map_err(session_error("Failed to set inter threads"))?
            .commit_from_memory(&model_data)
            .map_err(session_error("Failed to create session from model data"))?;

        let model_info = self.model_manager.get_info()?;
        tracing::debug!(
            provider = %config.execution_provider,
            intra_threads,
            inter_threads,
            model = %model_info.name,
            size_mb = model_info.size_bytes as f64 / (1024.0 * 1024.0),
            "ONNX Runtime session created"
        );

        self.session = Some(session);
        self.model_info = Some(model_info);

        let model_load_time = model_load_start.elapsed();
        tracing::info!(
            load_ms = model_load_time.as_millis() as u64,
            "ONNX model loaded"
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }
        self.load_model(config).map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| RembgError::internal("Backend not initialized"))?;

        let inference_start = Instant::now();
        let input_value = Value::from_array(input.clone())
            .map_err(|e| RembgError::inference(format!("Failed to convert input tensor: {e}")))?;

        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| RembgError::inference(format!("ONNX inference failed: {e}")))?;

        // Models differ in output naming, so take the first output.
        let first_key = outputs
            .keys()
            .next()
            .ok_or_else(|| RembgError::inference("No output tensors found"))?
            .to_string();
        let output_tensor = outputs
            .get(first_key.as_str())
            .ok_or_else(|| RembgError::inference("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| RembgError::inference(format!("Failed to extract output tensor: {e}")))?;

        let shape = output_tensor.shape().to_vec();
        let [batch, channels, height, width] = shape.as_slice() else {
            return Err(RembgError::inference(format!(
                "Expected 4D output tensor, got {}D",
                shape.len()
            )));
        };
        let result = Array4::from_shape_vec(
            (*batch, *channels, *height, *width),
            output_tensor.view().to_owned().into_raw_vec_and_offset().0,
        )
        .map_err(|e| RembgError::inference(format!("Failed to reshape output tensor: {e}")))?;

        tracing::debug!(
            inference_ms = inference_start.elapsed().as_secs_f64() * 1000.0,
            "ONNX inference complete"
        );
        Ok(result)
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
        self.session.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::write_model_dir;
    use tempfile::TempDir;

    #[test]
    fn test_uninitialized_backend() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_model_dir(temp_dir.path(), &["model.onnx"]);
        let manager = ModelManager::from_directory(&path, None, None).unwrap();

        let mut backend = OnnxBackend::with_model_manager(manager);
        assert!(!backend.is_initialized());
        assert_eq!(backend.input_shape(), (1, 3, 1024, 1024));
        assert_eq!(
            backend.get_preprocessing_config().unwrap().target_size,
            [1024, 1024]
        );

        let err = backend.infer(&Array4::zeros((1, 3, 8, 8))).unwrap_err();
        assert!(err.to_string().contains("not initialized"));
    }

    #[test]
    fn test_invalid_model_data_fails_to_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_model_dir(temp_dir.path(), &["model.onnx"]);
        let manager = ModelManager::from_directory(&path, None, None).unwrap();

        let mut backend = OnnxBackend::with_model_manager(manager);
        let config = RemovalConfig {
            execution_provider: ExecutionProvider::Cpu,
            ..RemovalConfig::default()
        };
        assert!(backend.initialize(&config).is_err());
        assert!(!backend.is_initialized());
    }

    #[test]
    fn test_cpu_always_listed() {
        let providers = OnnxBackend::list_providers();
        assert!(providers.contains(&("cpu", true)));
    }
}
