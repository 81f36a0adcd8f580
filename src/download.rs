//! Model downloads from `HuggingFace` repositories
//!
//! Files land in a scratch directory inside the cache root and are renamed
//! into place only once the whole model is present. A failed download or
//! move removes the scratch directory.

use crate::cache::ModelCache;
use crate::error::{RembgError, Result};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use std::fs;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

const HF_PREFIX: &str = "https://huggingface.co/";

/// Files that need to be downloaded for a `HuggingFace` model
const REQUIRED_FILES: &[&str] = &["config.json", "preprocessor_config.json"];

/// ONNX model files to attempt downloading
const ONNX_FILES: &[(&str, &str)] = &[
    ("onnx/model.onnx", "fp32"),
    ("onnx/model_fp16.onnx", "fp16"),
];

/// Model downloader
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// Create a downloader writing into `cache`
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| RembgError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client, cache })
    }

    /// Download a model repository into the cache and return its model ID
    ///
    /// Returns immediately when the model is already cached.
    ///
    /// # Errors
    /// - Unsupported URL
    /// - Network errors, or no ONNX variant could be fetched
    /// - File system errors while moving the model into place
    pub async fn download_model(&self, url: &str) -> Result<String> {
        validate_model_url(url)?;

        let model_id = ModelCache::url_to_model_id(url);
        if self.cache.is_model_cached(&model_id) {
            tracing::info!(model_id = %model_id, "Model already cached");
            return Ok(model_id);
        }

        tracing::info!(url = %url, model_id = %model_id, "Downloading model");

        let scratch_dir = self.cache.scratch_path(&model_id);
        fs::create_dir_all(&scratch_dir)
            .map_err(|e| RembgError::file_io_error("create download directory", &scratch_dir, &e))?;

        if let Err(e) = self.download_model_files(url, &scratch_dir).await {
            discard_dir(&scratch_dir);
            return Err(e);
        }

        install_model_dir(&scratch_dir, &self.cache.get_model_path(&model_id))?;

        tracing::info!(model_id = %model_id, "Model downloaded");
        Ok(model_id)
    }

    async fn download_model_files(&self, base_url: &str, download_dir: &Path) -> Result<()> {
        let raw_base = format!("{}/resolve/main/", base_url.trim_end_matches('/'));

        for file_name in REQUIRED_FILES {
            self.download_file(&format!("{raw_base}{file_name}"), &download_dir.join(file_name))
                .await?;
        }

        let mut downloaded_models = 0;
        for (file_path, variant) in ONNX_FILES {
            match self
                .download_file(&format!("{raw_base}{file_path}"), &download_dir.join(file_path))
                .await
            {
                Ok(()) => {
                    downloaded_models += 1;
                    tracing::info!(variant = %variant, "Downloaded model variant");
                },
                Err(e) => {
                    tracing::warn!(variant = %variant, error = %e, "Failed to download variant");
                },
            }
        }

        if downloaded_models == 0 {
            return Err(RembgError::network_error(
                "Failed to download any ONNX model variants",
                "no model files found",
            ));
        }
        Ok(())
    }

    async fn download_file(&self, url: &str, local_path: &Path) -> Result<()> {
        tracing::debug!(url = %url, path = %local_path.display(), "Downloading file");

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RembgError::file_io_error("create directory", parent, &e))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RembgError::network_error(format!("Failed to download {url}"), e))?;

        if !response.status().is_success() {
            return Err(RembgError::network_error(
                format!("Failed to download {url}"),
                format!("HTTP {}", response.status()),
            ));
        }

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| RembgError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 8192];
        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| RembgError::network_error("Failed to read download stream", e))?;
            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| RembgError::file_io_error("write to file", local_path, &e))?;
            downloaded += bytes_read as u64;
        }

        file.flush()
            .await
            .map_err(|e| RembgError::file_io_error("flush file", local_path, &e))?;

        tracing::debug!(bytes = downloaded, path = %local_path.display(), "File downloaded");
        Ok(())
    }
}

/// Rename a finished download into the cache
///
/// Both paths are inside the cache root, so the rename is atomic. On any
/// failure the scratch directory is removed and no model directory exists
/// at `final_dir`.
fn install_model_dir(scratch_dir: &Path, final_dir: &Path) -> Result<()> {
    if final_dir.exists() {
        if let Err(e) = fs::remove_dir_all(final_dir) {
            discard_dir(scratch_dir);
            return Err(RembgError::file_io_error(
                "remove existing model directory",
                final_dir,
                &e,
            ));
        }
    }

    fs::rename(scratch_dir, final_dir).map_err(|e| {
        discard_dir(scratch_dir);
        RembgError::file_io_error("move model into cache", final_dir, &e)
    })
}

fn discard_dir(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        tracing::warn!(path = %dir.display(), error = %e, "Failed to clean up download directory");
    }
}

/// Validate that a URL is a supported model repository
///
/// Only `https://huggingface.co/<org>/<repo>` URLs are accepted.
///
/// # Errors
/// - Empty URL, another host, or a missing repository name
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(RembgError::invalid_config("Model URL cannot be empty"));
    }

    let Some(repo_path) = url.strip_prefix(HF_PREFIX) else {
        return Err(RembgError::invalid_config(format!(
            "Unsupported URL format: {url}. Only HuggingFace repositories are supported ({HF_PREFIX}...)"
        )));
    };

    let mut parts = repo_path.split('/').filter(|p| !p.is_empty());
    if parts.next().is_none() || parts.next().is_none() {
        return Err(RembgError::invalid_config(format!(
            "Invalid HuggingFace repository URL: {url}. Expected format: {HF_PREFIX}username/repo-name"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_model_url() {
        assert!(validate_model_url("https://huggingface.co/imgly/isnet-general-onnx").is_ok());
        assert!(validate_model_url("https://huggingface.co/ZhengPeng7/BiRefNet").is_ok());

        let err = validate_model_url("").unwrap_err();
        assert!(err.to_string().contains("cannot be empty"));

        for url in [
            "http://huggingface.co/user/repo",
            "https://github.com/user/repo",
            "https://huggingface.co/",
            "https://huggingface.co/onlyuser",
            "https://subdomain.huggingface.co/user/repo",
        ] {
            assert!(validate_model_url(url).is_err(), "{url} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_cached_model_short_circuits() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        let model_path = cache.get_model_path("imgly--isnet-general-onnx");
        fs::create_dir_all(model_path.join("onnx")).unwrap();
        fs::write(model_path.join("config.json"), "{}").unwrap();
        fs::write(model_path.join("preprocessor_config.json"), "{}").unwrap();

        let downloader = ModelDownloader::new(cache).unwrap();
        let model_id = downloader
            .download_model("https://huggingface.co/imgly/isnet-general-onnx")
            .await
            .unwrap();
        assert_eq!(model_id, "imgly--isnet-general-onnx");
    }

    #[tokio::test]
    async fn test_rejects_unsupported_url_before_network() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        let downloader = ModelDownloader::new(cache).unwrap();

        let err = downloader
            .download_model("https://example.com/model.onnx")
            .await
            .unwrap_err();
        assert!(matches!(err, RembgError::InvalidConfig(_)));
    }

    fn write_partial_model(dir: &Path) {
        fs::create_dir_all(dir.join("onnx")).unwrap();
        fs::write(dir.join("config.json"), "{}").unwrap();
        fs::write(dir.join("preprocessor_config.json"), "{}").unwrap();
        fs::write(dir.join("onnx").join("model.onnx"), "data").unwrap();
    }

    #[test]
    fn test_install_replaces_existing_model() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        let final_dir = cache.get_model_path("acme--model");
        fs::create_dir_all(&final_dir).unwrap();
        fs::write(final_dir.join("stale.txt"), "old").unwrap();

        let scratch = cache.scratch_path("acme--model");
        write_partial_model(&scratch);
        install_model_dir(&scratch, &final_dir).unwrap();

        assert!(!scratch.exists());
        assert!(!final_dir.join("stale.txt").exists());
        assert!(cache.is_model_cached("acme--model"));
    }

    #[test]
    fn test_failed_install_leaves_nothing_behind() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        let scratch = cache.scratch_path("acme--model");
        write_partial_model(&scratch);

        // Destination parent does not exist, so the rename fails
        let final_dir = temp_dir.path().join("missing").join("acme--model");
        let err = install_model_dir(&scratch, &final_dir).unwrap_err();

        assert!(matches!(err, RembgError::Io(_)));
        assert!(!scratch.exists());
        assert!(!final_dir.exists());
        assert!(cache.scan_cached_models().unwrap().is_empty());
        assert!(!cache.is_model_cached("acme--model"));
    }
}
