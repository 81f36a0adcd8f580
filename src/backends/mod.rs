//! Inference backends
//!
//! - ONNX Runtime (GPU acceleration through CUDA or `CoreML`)
//! - Tract (pure Rust, CPU only)

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

#[cfg(test)]
pub(crate) mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;
