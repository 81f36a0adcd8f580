#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # rembg-server
//!
//! HTTP service that removes the background of an uploaded image and returns
//! the foreground on black as a fixed 224x224 PNG.
//!
//! ## Endpoints
//!
//! - `POST /rembg`: multipart field `image`. Answers `200 image/png` on
//!   success, `400 {"error": ...}` when no file was sent and
//!   `500 {"error": "Processing failed: ..."}` for anything else.
//! - `GET /health`: always `200 {"status": "ok"}`.
//!
//! ## Pipeline
//!
//! Each upload is decoded and converted to RGB, re-encoded as PNG, passed
//! through a [`BackgroundRemover`], decoded back to RGB (dropping alpha),
//! resized to exactly 224x224 and encoded as an optimized PNG. See
//! [`RembgPipeline`].
//!
//! The default remover is [`ProcessorRemover`], which runs a salient object
//! segmentation model (`ISNet` by default) through ONNX Runtime or Tract.
//! Models are fetched from `HuggingFace` into a local cache on first start.
//!
//! ## Embedding the router
//!
//! ```rust,no_run
//! use rembg_server::{
//!     server::{self, AppState},
//!     BackgroundRemovalProcessor, ProcessorConfig, ProcessorRemover, RembgPipeline, ServerConfig,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let remover = ProcessorRemover::new(BackgroundRemovalProcessor::new(ProcessorConfig::default()));
//! remover.initialize()?;
//!
//! let state = AppState::new(RembgPipeline::new(Arc::new(remover)));
//! server::serve(state, &ServerConfig::default()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with CUDA and `CoreML` support
//! - `tract` (default): Pure Rust backend
//! - `tracing-json` (default): JSON log output
//! - `webp-support` (default): WebP uploads

pub mod backends;
pub mod cache;
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod pipeline;
pub mod processor;
pub mod server;
pub mod services;
pub mod tracing_config;
pub mod types;
pub mod utils;

// Public API exports
pub use backends::*;
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use config::{ExecutionProvider, RemovalConfig, ServerConfig, OUTPUT_SIZE};
pub use download::{validate_model_url, ModelDownloader};
pub use error::{RembgError, Result};
pub use inference::InferenceBackend;
pub use models::{ModelInfo, ModelManager, ModelSource, ModelSpec, PreprocessingConfig};
pub use pipeline::{BackgroundRemover, ProcessorRemover, RembgPipeline};
pub use processor::{
    BackendFactory, BackendType, BackgroundRemovalProcessor, DefaultBackendFactory,
    ProcessorConfig, ProcessorConfigBuilder,
};
pub use services::ImageCodec;
pub use tracing_config::{TracingConfig, TracingFormat};
pub use types::{ProcessingTimings, SegmentationMask};
pub use utils::{ExecutionProviderManager, ImagePreprocessor, Letterbox, ProviderInfo};
