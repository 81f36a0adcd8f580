//! Execution provider strings (`backend:provider`)

use crate::{
    config::ExecutionProvider,
    error::{RembgError, Result},
    processor::BackendType,
};

/// Information about an execution provider
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub execution_provider: ExecutionProvider,
    pub available: bool,
}

pub struct ExecutionProviderManager;

impl ExecutionProviderManager {
    /// Parse a provider string such as `onnx:auto` or `tract:cpu`
    ///
    /// A bare backend name selects that backend's default provider.
    ///
    /// ```rust
    /// use rembg_server::utils::ExecutionProviderManager;
    /// use rembg_server::{BackendType, ExecutionProvider};
    ///
    /// let (backend, provider) = ExecutionProviderManager::parse_provider_string("onnx:cuda").unwrap();
    /// assert_eq!(backend, BackendType::Onnx);
    /// assert_eq!(provider, ExecutionProvider::Cuda);
    /// ```
    ///
    /// # Errors
    /// - Unknown backend or provider
    pub fn parse_provider_string(provider_str: &str) -> Result<(BackendType, ExecutionProvider)> {
        let Some((backend, provider)) = provider_str.split_once(':') else {
            return match provider_str {
                "onnx" => Ok((BackendType::Onnx, ExecutionProvider::Auto)),
                "tract" => Ok((BackendType::Tract, ExecutionProvider::Cpu)),
                _ => Err(RembgError::invalid_config(
                    "Invalid provider format. Use backend:provider (e.g., onnx:auto, tract:cpu)",
                )),
            };
        };

        match (backend, provider) {
            ("onnx", "auto") => Ok((BackendType::Onnx, ExecutionProvider::Auto)),
            ("onnx", "cpu") => Ok((BackendType::Onnx, ExecutionProvider::Cpu)),
            ("onnx", "cuda") => Ok((BackendType::Onnx, ExecutionProvider::Cuda)),
            ("onnx", "coreml") => Ok((BackendType::Onnx, ExecutionProvider::CoreMl)),
            ("onnx", other) => Err(RembgError::invalid_config(format!(
                "Unknown ONNX provider: {other}. Supported: auto, cpu, cuda, coreml"
            ))),
            ("tract", "cpu") => Ok((BackendType::Tract, ExecutionProvider::Cpu)),
            ("tract", other) => Err(RembgError::invalid_config(format!(
                "Unknown Tract provider: {other}. Tract only supports 'cpu'"
            ))),
            (other, _) => Err(RembgError::invalid_config(format!(
                "Unknown backend: {other}. Supported backends: onnx, tract"
            ))),
        }
    }

    /// Every provider combination with its availability in this build
    #[must_use]
    pub fn list_all_providers() -> Vec<ProviderInfo> {
        let mut providers = Vec::new();

        #[cfg(feature = "onnx")]
        let onnx = crate::backends::OnnxBackend::list_providers();
        #[cfg(not(feature = "onnx"))]
        let onnx: Vec<(&str, bool)> = Vec::new();

        let onnx_available = |name: &str| onnx.iter().any(|(n, available)| *n == name && *available);
        for (name, execution_provider) in [
            ("auto", ExecutionProvider::Auto),
            ("cpu", ExecutionProvider::Cpu),
            ("cuda", ExecutionProvider::Cuda),
            ("coreml", ExecutionProvider::CoreMl),
        ] {
            providers.push(ProviderInfo {
                name: format!("onnx:{name}"),
                backend_type: BackendType::Onnx,
                execution_provider,
                available: if name == "auto" {
                    onnx_available("cpu")
                } else {
                    onnx_available(name)
                },
            });
        }

        providers.push(ProviderInfo {
            name: "tract:cpu".to_string(),
            backend_type: BackendType::Tract,
            execution_provider: ExecutionProvider::Cpu,
            available: cfg!(feature = "tract"),
        });

        providers
    }

    /// Inverse of [`Self::parse_provider_string`]
    #[must_use]
    pub fn provider_to_string(backend_type: BackendType, provider: ExecutionProvider) -> String {
        format!("{backend_type}:{provider}")
    }
}
