//! Background removal processor
//!
//! Owns one inference backend and runs the letterbox → inference → mask →
//! composite sequence on decoded images.

use crate::{
    cache::ModelCache,
    config::{ExecutionProvider, RemovalConfig},
    error::{RembgError, Result},
    inference::InferenceBackend,
    models::{ModelManager, ModelSpec},
    types::{ProcessingTimings, SegmentationMask},
    utils::{ImagePreprocessor, Letterbox},
};
use image::{DynamicImage, GenericImageView, RgbaImage};
use instant::Instant;
use ndarray::Array4;
use std::path::PathBuf;
use tracing::{debug, info, instrument, span, Level};

/// Backend type enumeration for runtime selection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create a backend of `backend_type` for the resolved model
    ///
    /// # Errors
    /// - Backend not compiled into this build
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>>;

    /// Backends this factory can build
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Factory for the backends enabled through cargo features
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::with_model_manager(
                model_manager,
            ))),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(
                crate::backends::TractBackend::with_model_manager(model_manager),
            )),
            #[allow(unreachable_patterns)]
            other => {
                drop(model_manager);
                Err(RembgError::invalid_config(format!(
                    "Backend '{other}' is not enabled in this build"
                )))
            },
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        if cfg!(feature = "onnx") {
            backends.push(BackendType::Onnx);
        }
        if cfg!(feature = "tract") {
            backends.push(BackendType::Tract);
        }
        backends
    }
}

/// Processor configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    /// Model specification (cached or external)
    pub model_spec: ModelSpec,
    /// Backend type to use for inference
    pub backend_type: BackendType,
    /// Execution provider for the backend
    pub execution_provider: ExecutionProvider,
    /// Number of intra-op threads (0 = auto)
    pub intra_threads: usize,
    /// Number of inter-op threads (0 = auto)
    pub inter_threads: usize,
    /// Cache root override; `None` uses the default location
    pub cache_dir: Option<PathBuf>,
}

impl ProcessorConfig {
    #[must_use]
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder::new()
    }

    /// Settings handed to the backend on initialization
    #[must_use]
    pub fn to_removal_config(&self) -> RemovalConfig {
        RemovalConfig {
            execution_provider: self.execution_provider,
            intra_threads: self.intra_threads,
            inter_threads: self.inter_threads,
            model_spec: self.model_spec.clone(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            model_spec: ModelSpec::default(),
            backend_type: BackendType::Onnx,
            execution_provider: ExecutionProvider::Auto,
            intra_threads: 0,
            inter_threads: 0,
            cache_dir: None,
        }
    }
}

/// Builder for `ProcessorConfig`
#[derive(Debug, Default)]
pub struct ProcessorConfigBuilder {
    config: ProcessorConfig,
}

impl ProcessorConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    #[must_use]
    pub fn cache_dir(mut self, cache_dir: Option<PathBuf>) -> Self {
        self.config.cache_dir = cache_dir;
        self
    }

    /// # Errors
    /// - Tract combined with a provider other than CPU
    pub fn build(self) -> Result<ProcessorConfig> {
        if self.config.backend_type == BackendType::Tract
            && self.config.execution_provider != ExecutionProvider::Cpu
        {
            return Err(RembgError::invalid_config(format!(
                "Tract backend only supports the cpu provider, got {}",
                self.config.execution_provider
            )));
        }
        Ok(self.config)
    }
}

/// Background removal processor
pub struct BackgroundRemovalProcessor {
    config: ProcessorConfig,
    backend_factory: Box<dyn BackendFactory>,
    backend: Option<Box<dyn InferenceBackend>>,
    model_load_ms: u64,
    last_timings: Option<ProcessingTimings>,
}

impl std::fmt::Debug for BackgroundRemovalProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemovalProcessor")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl BackgroundRemovalProcessor {
    /// Create a processor backed by the compiled-in backends
    #[must_use]
    pub fn new(config: ProcessorConfig) -> Self {
        Self::with_factory(config, Box::new(DefaultBackendFactory))
    }

    #[must_use]
    pub fn with_factory(config: ProcessorConfig, backend_factory: Box<dyn BackendFactory>) -> Self {
        Self {
            config,
            backend_factory,
            backend: None,
            model_load_ms: 0,
            last_timings: None,
        }
    }

    /// Resolve the model and load it into the backend
    ///
    /// Calling this again after a successful initialization does nothing.
    ///
    /// # Errors
    /// - Model not found or malformed
    /// - Backend unavailable or failing to load the model
    pub fn initialize(&mut self) -> Result<()> {
        if self.backend.is_some() {
            return Ok(());
        }

        info!(
            model = %self.config.model_spec.source.display_name(),
            backend = %self.config.backend_type,
            provider = %self.config.execution_provider,
            "Initializing background removal processor"
        );

        let cache = match &self.config.cache_dir {
            Some(dir) => ModelCache::with_custom_cache_dir(dir)?,
            None => ModelCache::new()?,
        };
        let model_manager = ModelManager::from_spec_with_provider(
            &self.config.model_spec,
            Some(&self.config.execution_provider),
            &cache,
        )?;

        let mut backend = self
            .backend_factory
            .create_backend(self.config.backend_type, model_manager)?;
        let model_load_time = backend.initialize(&self.config.to_removal_config())?;
        self.model_load_ms = model_load_time.map_or(0, |d| d.as_millis() as u64);

        let model_info = backend.get_model_info()?;
        info!(
            model = %model_info.name,
            precision = %model_info.precision,
            size_bytes = model_info.size_bytes,
            input_shape = ?model_info.input_shape,
            load_ms = self.model_load_ms,
            "Background removal processor initialized"
        );
        self.backend = Some(backend);
        Ok(())
    }

    /// Remove the background of `image`
    ///
    /// The result has the input's dimensions. Its alpha channel is the
    /// segmentation mask and its colors are blended over transparent black.
    ///
    /// # Errors
    /// - Initialization failures
    /// - Inference errors or unexpected output shapes
    #[instrument(
        skip(self, image),
        fields(
            backend = %self.config.backend_type,
            model = %self.config.model_spec.source.display_name(),
            dimensions = %format!("{}x{}", image.width(), image.height())
        )
    )]
    pub fn process_image(&mut self, image: &DynamicImage) -> Result<RgbaImage> {
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();

        let mask = self.segment_with_timings(image, &mut timings)?;

        let composite_start = Instant::now();
        let result = {
            let _span = span!(Level::DEBUG, "composite").entered();
            mask.composite(&image.to_rgb8())?
        };
        timings.postprocessing_ms += composite_start.elapsed().as_millis() as u64;
        timings.total_ms = total_start.elapsed().as_millis() as u64;

        debug!(
            model_load_ms = timings.model_load_ms,
            preprocessing_ms = timings.preprocessing_ms,
            inference_ms = timings.inference_ms,
            postprocessing_ms = timings.postprocessing_ms,
            other_ms = timings.other_overhead_ms(),
            total_ms = timings.total_ms,
            foreground_ratio = mask.foreground_ratio(),
            "Background removal complete"
        );
        self.last_timings = Some(timings);

        Ok(result)
    }

    /// Decode `image_bytes` and remove the background
    ///
    /// # Errors
    /// - Undecodable input
    /// - Any error from [`Self::process_image`]
    pub fn process_bytes(&mut self, image_bytes: &[u8]) -> Result<RgbaImage> {
        let image = image::load_from_memory(image_bytes).map_err(|e| {
            RembgError::processing(format!("Failed to decode image from bytes: {e}"))
        })?;
        self.process_image(&image)
    }

    /// Segmentation mask of `image` without compositing
    ///
    /// # Errors
    /// - Initialization failures
    /// - Inference errors or unexpected output shapes
    pub fn segment(&mut self, image: &DynamicImage) -> Result<SegmentationMask> {
        let mut timings = ProcessingTimings::default();
        self.segment_with_timings(image, &mut timings)
    }

    fn segment_with_timings(
        &mut self,
        image: &DynamicImage,
        timings: &mut ProcessingTimings,
    ) -> Result<SegmentationMask> {
        if self.backend.is_none() {
            self.initialize()?;
            timings.model_load_ms = self.model_load_ms;
        }
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| RembgError::internal("Backend not initialized"))?;

        let preprocess_start = Instant::now();
        let preprocessing_config = backend.get_preprocessing_config()?;
        let (input_tensor, letterbox) = {
            let _span = span!(Level::DEBUG, "preprocessing").entered();
            ImagePreprocessor::preprocess_for_inference(image, &preprocessing_config)?
        };
        timings.preprocessing_ms = preprocess_start.elapsed().as_millis() as u64;

        let inference_start = Instant::now();
        let output_tensor = {
            let _span = span!(Level::DEBUG, "inference").entered();
            backend.infer(&input_tensor)?
        };
        timings.inference_ms = inference_start.elapsed().as_millis() as u64;

        let postprocess_start = Instant::now();
        let [target_height, target_width] = preprocessing_config.target_size;
        let mask = tensor_to_mask(
            &output_tensor,
            image.dimensions(),
            &letterbox,
            (target_width, target_height),
        )?;
        timings.postprocessing_ms = postprocess_start.elapsed().as_millis() as u64;

        Ok(mask)
    }

    #[must_use]
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    /// Timings of the most recent [`Self::process_image`] call
    #[must_use]
    pub fn last_timings(&self) -> Option<&ProcessingTimings> {
        self.last_timings.as_ref()
    }

    #[must_use]
    pub fn available_backends(&self) -> Vec<BackendType> {
        self.backend_factory.available_backends()
    }
}

/// Map a `[1, 1, H, W]` model output back onto the original image
///
/// Each original pixel samples the tensor at the position its center landed
/// on during letterboxing. Values are clamped to 0..1 and scaled to 0..255.
fn tensor_to_mask(
    tensor: &Array4<f32>,
    original_dimensions: (u32, u32),
    letterbox: &Letterbox,
    model_size: (u32, u32),
) -> Result<SegmentationMask> {
    let (batch, channels, mask_height, mask_width) = tensor.dim();
    if batch != 1 || channels != 1 || mask_height == 0 || mask_width == 0 {
        return Err(RembgError::processing(format!(
            "Invalid output tensor shape: {:?}",
            tensor.shape()
        )));
    }

    // Some models emit a mask at a different resolution than their input.
    let ratio_x = mask_width as f32 / model_size.0.max(1) as f32;
    let ratio_y = mask_height as f32 / model_size.1.max(1) as f32;

    let (orig_width, orig_height) = original_dimensions;
    let mut mask_data = Vec::with_capacity(orig_width as usize * orig_height as usize);
    for y in 0..orig_height {
        let canvas_y = (y as f32 + 0.5) * letterbox.scale + letterbox.offset_y as f32;
        let tensor_y = ((canvas_y * ratio_y) as usize).min(mask_height - 1);
        for x in 0..orig_width {
            let canvas_x = (x as f32 + 0.5) * letterbox.scale + letterbox.offset_x as f32;
            let tensor_x = ((canvas_x * ratio_x) as usize).min(mask_width - 1);

            let value = tensor
                .get([0, 0, tensor_y, tensor_x])
                .copied()
                .unwrap_or(0.0);
            mask_data.push((value.clamp(0.0, 1.0) * 255.0).round() as u8);
        }
    }

    Ok(SegmentationMask::new(mask_data, original_dimensions))
}
