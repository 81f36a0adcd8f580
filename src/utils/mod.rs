//! Shared helpers for preprocessing and provider selection

pub mod preprocessing;
pub mod providers;

pub use preprocessing::{ImagePreprocessor, Letterbox};
pub use providers::{ExecutionProviderManager, ProviderInfo};
