//! On-disk cache of downloaded models
//!
//! Every cached model lives in its own directory under the cache root,
//! named by the identifier returned from [`ModelCache::url_to_model_id`].

use crate::error::{RembgError, Result};
use crate::models::scan_variants;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "REMBG_CACHE_DIR";

/// Information about a cached model
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Model identifier (derived from URL)
    pub model_id: String,
    /// Path to the cached model directory
    pub path: PathBuf,
    /// Available ONNX model variants (fp16, fp32)
    pub variants: Vec<String>,
    /// Total size of the model directory in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Open the cache in its default location
    ///
    /// `$REMBG_CACHE_DIR/models` when the variable is set, otherwise the
    /// platform cache directory joined with `rembg-server/models`.
    ///
    /// # Errors
    /// - No platform cache directory and no override
    /// - Failed to create the cache directory
    pub fn new() -> Result<Self> {
        let cache_dir = Self::default_cache_dir()?;
        Self::ensure_dir(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// Open the cache under a custom root (`<root>/models`)
    ///
    /// # Errors
    /// - Failed to create the cache directory
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        let models_dir = cache_dir.join("models");
        Self::ensure_dir(&models_dir)?;
        Ok(Self {
            cache_dir: models_dir,
        })
    }

    fn default_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                RembgError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV}."
                ))
            })?
            .join("rembg-server")
            .join("models"))
    }

    fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| RembgError::file_io_error("create cache directory", dir, &e))?;
        }
        Ok(())
    }

    /// Generate a filesystem-safe model ID from a URL
    ///
    /// ```
    /// use rembg_server::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id("https://huggingface.co/imgly/isnet-general-onnx");
    /// assert_eq!(id, "imgly--isnet-general-onnx");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        const HF_PREFIX: &str = "https://huggingface.co/";

        if let Some(repo) = url.strip_prefix(HF_PREFIX) {
            return repo.replace('/', "--");
        }

        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(url.as_bytes());
        let hash_string = format!("url-{:x}", digest);
        hash_string.get(..16).unwrap_or(&hash_string).to_string()
    }

    /// Whether `model_id` has a complete model directory in the cache
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        Self::validate_model_directory(&self.cache_dir.join(model_id))
    }

    /// Path to a cached model directory (may not exist)
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id)
    }

    /// Fresh scratch directory path for an in-progress download of `model_id`
    ///
    /// It lives inside the cache root so the finished download can be
    /// renamed into place atomically. Scans skip it.
    #[must_use]
    pub(crate) fn scratch_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(format!(
            "{SCRATCH_PREFIX}{model_id}-{}",
            uuid::Uuid::new_v4().simple()
        ))
    }

    /// Root directory holding the model directories
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// List every valid model in the cache, sorted by ID
    ///
    /// # Errors
    /// - Failed to read the cache directory
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| RembgError::file_io_error("read cache directory", &self.cache_dir, &e))?;

        let mut models = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| RembgError::file_io_error("read cache entry", &self.cache_dir, &e))?
                .path();
            if !path.is_dir() || is_scratch_dir(&path) {
                continue;
            }
            if !Self::validate_model_directory(&path) {
                tracing::debug!(path = %path.display(), "Skipping invalid model directory");
                continue;
            }
            let Some(model_id) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };

            models.push(CachedModelInfo {
                model_id,
                variants: scan_variants(&path.join("onnx")).unwrap_or_default(),
                size_bytes: directory_size(&path).unwrap_or(0),
                path,
            });
        }

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    fn validate_model_directory(model_path: &Path) -> bool {
        model_path.join("config.json").is_file()
            && model_path.join("preprocessor_config.json").is_file()
            && model_path.join("onnx").is_dir()
    }
}

/// Name prefix of in-progress download directories
const SCRATCH_PREFIX: &str = ".partial-";

fn is_scratch_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(SCRATCH_PREFIX))
}

fn directory_size(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        total += if path.is_dir() {
            directory_size(&path)?
        } else {
            entry.metadata()?.len()
        };
    }
    Ok(total)
}

/// Format a byte count for humans
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    let unit = UNITS.get(unit_index).unwrap_or(&"B");
    if unit_index == 0 {
        format!("{bytes} {unit}")
    } else {
        format!("{size:.1} {unit}")
    }
}
