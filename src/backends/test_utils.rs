//! Mock backend for exercising the processor without model files

use crate::{
    config::RemovalConfig,
    error::{RembgError, Result},
    inference::InferenceBackend,
    models::{ModelInfo, ModelManager, PreprocessingConfig},
    processor::{BackendFactory, BackendType},
};
use instant::Duration;
use ndarray::Array4;
use std::sync::{Arc, Mutex};

/// Side length of the mock model's square input
pub(crate) const MOCK_SIZE: usize = 32;

/// What the mock produces from `infer`
#[derive(Debug, Clone, Copy)]
pub(crate) enum MockMask {
    /// Every output value is the given constant
    Constant(f32),
    /// 1.0 on the left half of the tensor, 0.0 on the right half
    LeftHalf,
}

#[derive(Debug, Clone)]
pub(crate) struct MockBackend {
    initialized: bool,
    mask: MockMask,
    fail_init: bool,
    fail_inference: bool,
    call_history: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self::with_mask(MockMask::Constant(1.0))
    }

    pub(crate) fn with_mask(mask: MockMask) -> Self {
        Self {
            initialized: false,
            mask,
            fail_init: false,
            fail_inference: false,
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn failing_init() -> Self {
        Self {
            fail_init: true,
            ..Self::new()
        }
    }

    pub(crate) fn failing_inference() -> Self {
        Self {
            fail_inference: true,
            ..Self::new()
        }
    }

    pub(crate) fn call_history(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_history)
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &RemovalConfig) -> Result<Option<Duration>> {
        self.record_call("initialize");
        if self.fail_init {
            return Err(RembgError::model("Mock backend initialization failed"));
        }
        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");
        if !self.initialized {
            return Err(RembgError::internal("Backend not initialized"));
        }
        if self.fail_inference {
            return Err(RembgError::inference("Mock inference failed"));
        }

        let (batch, _, height, width) = input.dim();
        let output = match self.mask {
            MockMask::Constant(value) => Array4::from_elem((batch, 1, height, width), value),
            MockMask::LeftHalf => Array4::from_shape_fn((batch, 1, height, width), |(_, _, _, x)| {
                if x < width / 2 {
                    1.0
                } else {
                    0.0
                }
            }),
        };
        Ok(output)
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        (1, 3, MOCK_SIZE, MOCK_SIZE)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        (1, 1, MOCK_SIZE, MOCK_SIZE)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        if !self.initialized {
            return Err(RembgError::internal("Backend not initialized"));
        }
        Ok(PreprocessingConfig {
            target_size: [MOCK_SIZE as u32, MOCK_SIZE as u32],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        })
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        Ok(ModelInfo {
            name: "mock-fp32".to_string(),
            precision: "fp32".to_string(),
            size_bytes: 1024,
            input_shape: self.input_shape(),
            output_shape: self.output_shape(),
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Factory handing out clones of a prepared mock backend
#[derive(Debug, Clone)]
pub(crate) struct MockBackendFactory {
    pub(crate) backend: MockBackend,
}

impl BackendFactory for MockBackendFactory {
    fn create_backend(
        &self,
        _backend_type: BackendType,
        _model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>> {
        Ok(Box::new(self.backend.clone()))
    }

    fn available_backends(&self) -> Vec<BackendType> {
        vec![BackendType::Onnx, BackendType::Tract]
    }
}
