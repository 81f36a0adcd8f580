//! Model resolution for HuggingFace-format segmentation models
//!
//! A model directory looks like this:
//!
//! ```text
//! <model>/
//!   config.json
//!   preprocessor_config.json
//!   onnx/model.onnx        (fp32)
//!   onnx/model_fp16.onnx   (fp16)
//! ```
//!
//! Directories come either from the [`ModelCache`](crate::cache::ModelCache)
//! or from an arbitrary path on disk.

use crate::cache::ModelCache;
use crate::config::ExecutionProvider;
use crate::error::{RembgError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Repository the server falls back to when nothing else is configured
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/imgly/isnet-general-onnx";

/// Cache identifier of [`DEFAULT_MODEL_URL`]
pub const DEFAULT_MODEL_ID: &str = "imgly--isnet-general-onnx";

/// Model source specification
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ModelSource {
    /// External model from filesystem path
    External(PathBuf),
    /// Downloaded model from cache by model ID
    Downloaded(String),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => {
                format!(
                    "external:{}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                )
            },
            ModelSource::Downloaded(model_id) => {
                format!("cached:{}", model_id)
            },
        }
    }
}

/// Complete model specification including source and optional variant
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    pub variant: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::Downloaded(DEFAULT_MODEL_ID.to_string()),
            variant: None,
        }
    }
}

impl ModelSpec {
    /// Interpret a user supplied model argument
    ///
    /// URLs map to their cache identifier, existing directories become
    /// external models, anything else is taken as a cache identifier.
    #[must_use]
    pub fn parse(model_arg: &str, variant: Option<String>) -> Self {
        let source = if model_arg.starts_with("https://") || model_arg.starts_with("http://") {
            ModelSource::Downloaded(ModelCache::url_to_model_id(model_arg))
        } else if Path::new(model_arg).is_dir() {
            ModelSource::External(PathBuf::from(model_arg))
        } else {
            ModelSource::Downloaded(model_arg.to_string())
        };

        Self { source, variant }
    }
}

/// Model information and metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub precision: String,
    pub size_bytes: usize,
    pub input_shape: (usize, usize, usize, usize), // NCHW format
    pub output_shape: (usize, usize, usize, usize),
}

/// Resize and normalization parameters a model expects
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingConfig {
    /// Target tensor size as `[height, width]`
    pub target_size: [u32; 2],
    /// Per-channel mean in the 0-1 range
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation in the 0-1 range
    pub normalization_std: [f32; 3],
}

/// Resolved model directory with its parsed configuration
#[derive(Debug, Clone)]
pub struct ModelManager {
    model_path: PathBuf,
    model_config: serde_json::Value,
    preprocessor_config: serde_json::Value,
    variant: String,
}

impl ModelManager {
    /// Resolve a model specification into a loadable model
    ///
    /// # Errors
    /// - Downloaded model not present in the cache
    /// - External path is not a directory
    /// - Missing or malformed `config.json` / `preprocessor_config.json`
    /// - Requested variant not available
    pub fn from_spec_with_provider(
        spec: &ModelSpec,
        execution_provider: Option<&ExecutionProvider>,
        cache: &ModelCache,
    ) -> Result<Self> {
        let model_path = match &spec.source {
            ModelSource::External(path) => {
                if !path.is_dir() {
                    return Err(RembgError::invalid_config(format!(
                        "Model path is not a directory: {}",
                        path.display()
                    )));
                }
                path.clone()
            },
            ModelSource::Downloaded(model_id) => {
                if !cache.is_model_cached(model_id) {
                    let available = cache
                        .scan_cached_models()?
                        .into_iter()
                        .map(|m| m.model_id)
                        .collect::<Vec<_>>();
                    return Err(RembgError::model(format!(
                        "Model '{}' not found in cache. Available models: {:?}",
                        model_id, available
                    )));
                }
                cache.get_model_path(model_id)
            },
        };

        Self::from_directory(&model_path, spec.variant.clone(), execution_provider)
    }

    /// Load a model directory directly
    ///
    /// # Errors
    /// - Missing or malformed configuration files
    /// - No ONNX files present, or requested variant missing
    pub fn from_directory(
        model_path: &Path,
        variant: Option<String>,
        execution_provider: Option<&ExecutionProvider>,
    ) -> Result<Self> {
        let model_config = read_json(&model_path.join("config.json"))?;
        let preprocessor_config = read_json(&model_path.join("preprocessor_config.json"))?;
        let available = scan_variants(&model_path.join("onnx"))?;
        let variant = resolve_variant(&available, variant, execution_provider)?;

        tracing::debug!(
            path = %model_path.display(),
            variant = %variant,
            "Resolved model directory"
        );

        Ok(Self {
            model_path: model_path.to_path_buf(),
            model_config,
            preprocessor_config,
            variant,
        })
    }

    /// Load model data
    ///
    /// # Errors
    /// - Model file missing or unreadable
    pub fn load_model(&self) -> Result<Vec<u8>> {
        let path = self.get_model_path();
        fs::read(&path).map_err(|e| RembgError::file_io_error("read model file", &path, &e))
    }

    /// Get model information
    ///
    /// # Errors
    /// - Model file missing
    /// - Preprocessor config lacks a usable size
    pub fn get_info(&self) -> Result<ModelInfo> {
        let path = self.get_model_path();
        let size_bytes = fs::metadata(&path)
            .map_err(|e| RembgError::file_io_error("stat model file", &path, &e))?
            .len() as usize;

        let model_type = self
            .model_config
            .get("model_type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        let [height, width] = parse_image_size(&self.preprocessor_config)?;
        let (height, width) = (height as usize, width as usize);

        Ok(ModelInfo {
            name: format!("{}-{}", model_type, self.variant),
            precision: self.variant.clone(),
            size_bytes,
            input_shape: (1, 3, height, width),
            output_shape: (1, 1, height, width),
        })
    }

    /// Get preprocessing configuration
    ///
    /// # Errors
    /// - Missing or invalid `size`, `image_mean` or `image_std`
    pub fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(PreprocessingConfig {
            target_size: parse_image_size(&self.preprocessor_config)?,
            normalization_mean: parse_channel_triplet(&self.preprocessor_config, "image_mean")?,
            normalization_std: parse_channel_triplet(&self.preprocessor_config, "image_std")?,
        })
    }

    /// Path to the ONNX file of the selected variant
    #[must_use]
    pub fn get_model_path(&self) -> PathBuf {
        let onnx_dir = self.model_path.join("onnx");
        match self.variant.as_str() {
            "fp16" => onnx_dir.join("model_fp16.onnx"),
            "fp32" => onnx_dir.join("model.onnx"),
            variant => onnx_dir.join(format!("model_{}.onnx", variant)),
        }
    }

    /// Selected variant (fp16, fp32, ...)
    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let content =
        fs::read_to_string(path).map_err(|e| RembgError::file_io_error("read", path, &e))?;
    serde_json::from_str(&content).map_err(|e| {
        RembgError::model(format!("Failed to parse {}: {}", path.display(), e))
    })
}

/// Map the ONNX files in `onnx_dir` to variant names
///
/// `model.onnx` is fp32, `model_fp16.onnx` is fp16, `model_<v>.onnx` is `<v>`.
pub(crate) fn scan_variants(onnx_dir: &Path) -> Result<Vec<String>> {
    if !onnx_dir.is_dir() {
        return Err(RembgError::model(format!(
            "ONNX directory not found: {}",
            onnx_dir.display()
        )));
    }

    let mut variants = Vec::new();
    let entries =
        fs::read_dir(onnx_dir).map_err(|e| RembgError::file_io_error("read", onnx_dir, &e))?;
    for entry in entries.flatten() {
        let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        match file_name.as_str() {
            "model.onnx" => variants.push("fp32".to_string()),
            "model_fp16.onnx" => variants.push("fp16".to_string()),
            other => {
                if let Some(variant) = other
                    .strip_prefix("model_")
                    .and_then(|s| s.strip_suffix(".onnx"))
                {
                    variants.push(variant.to_string());
                }
            },
        }
    }
    variants.sort();

    if variants.is_empty() {
        return Err(RembgError::model(format!(
            "No ONNX model files found in {}",
            onnx_dir.display()
        )));
    }
    Ok(variants)
}

fn resolve_variant(
    available: &[String],
    requested: Option<String>,
    execution_provider: Option<&ExecutionProvider>,
) -> Result<String> {
    let has = |v: &str| available.iter().any(|a| a == v);

    if let Some(variant) = requested {
        if has(&variant) {
            return Ok(variant);
        }
        return Err(RembgError::model(format!(
            "Requested variant '{}' not available. Available: {:?}",
            variant, available
        )));
    }

    let preferred = match execution_provider {
        Some(ExecutionProvider::CoreMl) => Some("fp32"),
        Some(ExecutionProvider::Cuda | ExecutionProvider::Cpu) => Some("fp16"),
        Some(ExecutionProvider::Auto) if cfg!(target_os = "macos") => Some("fp32"),
        Some(ExecutionProvider::Auto) => Some("fp16"),
        None => None,
    };
    if let Some(preferred) = preferred.filter(|p| has(p)) {
        return Ok(preferred.to_string());
    }

    ["fp16", "fp32"]
        .into_iter()
        .find(|p| has(p))
        .map(str::to_string)
        .or_else(|| available.first().cloned())
        .ok_or_else(|| RembgError::model("No model variants available"))
}

fn parse_image_size(preprocessor: &serde_json::Value) -> Result<[u32; 2]> {
    let size = preprocessor
        .get("size")
        .ok_or_else(|| RembgError::model("Missing size in preprocessor config"))?;

    let dimension = |key: &str| -> Result<u32> {
        size.get(key)
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| RembgError::model(format!("Missing or invalid {key} in size config")))?
            .try_into()
            .map_err(|_| RembgError::model(format!("{key} value too large for u32")))
    };

    Ok([dimension("height")?, dimension("width")?])
}

/// Parse a 3-value channel array and scale it from 0-255 to 0-1
fn parse_channel_triplet(preprocessor: &serde_json::Value, key: &str) -> Result<[f32; 3]> {
    let values = preprocessor
        .get(key)
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| {
            RembgError::model(format!("Missing or invalid {key} in preprocessor config"))
        })?;
    if values.len() < 3 {
        return Err(RembgError::model(format!("{key} must have at least 3 values")));
    }

    let mut out = [0.0_f32; 3];
    for (slot, value) in out.iter_mut().zip(values.iter()) {
        *slot = (value
            .as_f64()
            .ok_or_else(|| RembgError::model(format!("Non-numeric value in {key}")))?
            / 255.0) as f32;
    }
    Ok(out)
}
