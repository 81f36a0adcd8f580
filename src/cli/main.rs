//! rembg-server command line
//!
//! Parses flags (each also readable from the environment or a `.env` file),
//! makes sure the model is available, loads it once and serves HTTP.

use super::config::{CliConfigBuilder, ModelPlan};
use crate::{
    cache::{format_size, ModelCache},
    config::{DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_PORT},
    download::ModelDownloader,
    models::DEFAULT_MODEL_ID,
    pipeline::{ProcessorRemover, RembgPipeline},
    processor::BackgroundRemovalProcessor,
    server::{self, AppState},
    tracing_config::TracingFormat,
    utils::ExecutionProviderManager,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;

/// HTTP service that removes image backgrounds
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "rembg-server")]
pub struct Cli {
    /// Interface to bind
    #[arg(long, env = "REMBG_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// TCP port to bind
    #[arg(short, long, env = "REMBG_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Model cache id, HuggingFace URL, or path to a model folder
    #[arg(short, long, env = "REMBG_MODEL", default_value = DEFAULT_MODEL_ID)]
    pub model: String,

    /// Model variant (fp16, fp32) [default: picked for the execution provider]
    #[arg(long, env = "REMBG_MODEL_VARIANT")]
    pub variant: Option<String>,

    /// Execution provider in format backend:provider (e.g., onnx:auto, onnx:coreml, tract:cpu)
    #[arg(short, long, env = "REMBG_EXECUTION_PROVIDER", default_value = "onnx:auto")]
    pub execution_provider: String,

    /// Number of inference threads (0 = let the runtime decide)
    #[arg(short, long, env = "REMBG_THREADS", default_value_t = 0)]
    pub threads: usize,

    /// Use custom cache directory
    #[arg(long, env = "REMBG_CACHE_DIR", value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Largest accepted request body in bytes
    #[arg(long, env = "REMBG_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    /// Fail at startup instead of downloading a missing model
    #[arg(long, env = "REMBG_NO_DOWNLOAD")]
    pub no_download: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log line format (console, compact, json)
    #[arg(long, env = "REMBG_LOG_FORMAT", default_value = "console")]
    pub log_format: TracingFormat,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// List cached models and exit
    #[arg(long)]
    pub list_models: bool,
}

/// Process entry point
///
/// # Errors
/// - Invalid arguments or configuration
/// - Model missing, failing to download or failing to load
/// - Listener cannot bind
pub async fn main() -> Result<()> {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    CliConfigBuilder::tracing(&cli)
        .init()
        .context("Failed to initialize logging")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    let cache = CliConfigBuilder::cache(&cli)?;

    if cli.list_models {
        return list_cached_models(&cache);
    }

    let server_config = CliConfigBuilder::server(&cli)?;
    let processor_config = CliConfigBuilder::processor(&cli)?;

    ensure_model_available(&cli, &cache).await?;

    tracing::info!(
        model = %processor_config.model_spec.source.display_name(),
        provider = %ExecutionProviderManager::provider_to_string(
            processor_config.backend_type,
            processor_config.execution_provider,
        ),
        "Loading model"
    );

    let remover = Arc::new(ProcessorRemover::new(BackgroundRemovalProcessor::new(
        processor_config,
    )));
    let loader = Arc::clone(&remover);
    tokio::task::spawn_blocking(move || loader.initialize())
        .await
        .context("Model loading task failed")?
        .context("Failed to load model")?;

    let state = AppState::new(RembgPipeline::new(remover));
    server::serve(state, &server_config)
        .await
        .with_context(|| format!("Server on {} failed", server_config.bind_addr()))?;

    Ok(())
}

async fn ensure_model_available(cli: &Cli, cache: &ModelCache) -> Result<()> {
    match CliConfigBuilder::model_plan(cli, cache) {
        ModelPlan::Ready => Ok(()),
        ModelPlan::Download(url) => {
            tracing::info!(url = %url, cache_dir = %cache.cache_dir().display(), "Downloading model");
            let downloader = ModelDownloader::new(cache.clone())?;
            let model_id = downloader
                .download_model(&url)
                .await
                .with_context(|| format!("Failed to download model from {url}"))?;
            tracing::info!(model_id = %model_id, "Model ready");
            Ok(())
        },
        ModelPlan::Missing(model_id) => bail!(
            "Model '{model_id}' is not in the cache at {}. Pass a model URL or folder with --model{}",
            cache.cache_dir().display(),
            if cli.no_download { " or drop --no-download" } else { "" }
        ),
    }
}

fn show_provider_diagnostics() {
    println!("Execution providers:");
    for provider in ExecutionProviderManager::list_all_providers() {
        let status = if provider.available { "available" } else { "not available" };
        println!("  {:<14} {status}", provider.name);
    }
}

fn list_cached_models(cache: &ModelCache) -> Result<()> {
    let models = cache
        .scan_cached_models()
        .context("Failed to scan model cache")?;

    println!("Cache directory: {}", cache.cache_dir().display());
    if models.is_empty() {
        println!("No cached models. The default model is downloaded on first start.");
        return Ok(());
    }
    for model in models {
        println!(
            "  {} [{}] {}",
            model.model_id,
            model.variants.join(", "),
            format_size(model.size_bytes)
        );
    }
    Ok(())
}
