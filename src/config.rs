//! Configuration types for the inference engine and the HTTP server

use crate::error::{RembgError, Result};
use crate::models::ModelSpec;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Side length of every image returned by `/rembg`
pub const OUTPUT_SIZE: u32 = 224;

/// Default port the server binds to
pub const DEFAULT_PORT: u16 = 5000;

/// Default upload limit for the multipart body (32 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Settings handed to an inference backend when it loads its model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RemovalConfig {
    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    /// Model specification including source and variant
    pub model_spec: ModelSpec,
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: IpAddr,
    /// TCP port to bind
    pub port: u16,
    /// Maximum accepted request body size in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    /// Socket address the listener binds to
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Reject settings the server cannot run with
    ///
    /// # Errors
    /// - Upload limit of zero bytes
    pub fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(RembgError::invalid_config(
                "max upload size must be greater than zero",
            ));
        }
        Ok(())
    }
}
