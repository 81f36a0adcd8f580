//! Conversion of CLI arguments into library configuration

use crate::cli::main_impl::Cli;
use crate::{
    cache::ModelCache,
    config::ServerConfig,
    models::{ModelSource, ModelSpec, DEFAULT_MODEL_ID, DEFAULT_MODEL_URL},
    processor::{ProcessorConfig, ProcessorConfigBuilder},
    tracing_config::TracingConfig,
    utils::ExecutionProviderManager,
};
use anyhow::{Context, Result};

/// Where the model for this run comes from, and whether it must be fetched first
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ModelPlan {
    /// Model directory on disk or an entry already in the cache
    Ready,
    /// Cache entry missing; fetch it from this URL before loading
    Download(String),
    /// Cache entry missing and downloading is not possible or disabled
    Missing(String),
}

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    pub(crate) fn tracing(cli: &Cli) -> TracingConfig {
        TracingConfig::new()
            .with_verbosity(cli.verbose)
            .with_format(cli.log_format)
    }

    pub(crate) fn server(cli: &Cli) -> Result<ServerConfig> {
        let config = ServerConfig {
            host: cli.host,
            port: cli.port,
            max_upload_bytes: cli.max_upload_bytes,
        };
        config.validate().context("Invalid server configuration")?;
        Ok(config)
    }

    /// The model spec the arguments ask for
    ///
    /// URL arguments map to the cache entry they download into.
    pub(crate) fn model_spec(cli: &Cli) -> ModelSpec {
        ModelSpec::parse(&cli.model, cli.variant.clone())
    }

    pub(crate) fn processor(cli: &Cli) -> Result<ProcessorConfig> {
        let (backend_type, execution_provider) =
            ExecutionProviderManager::parse_provider_string(&cli.execution_provider)
                .context("Invalid execution provider format")?;

        let config = ProcessorConfigBuilder::new()
            .model_spec(Self::model_spec(cli))
            .backend_type(backend_type)
            .execution_provider(execution_provider)
            .intra_threads(cli.threads)
            .inter_threads(cli.threads)
            .cache_dir(cli.cache_dir.clone())
            .build()
            .context("Invalid configuration")?;

        Ok(config)
    }

    pub(crate) fn cache(cli: &Cli) -> Result<ModelCache> {
        let cache = match &cli.cache_dir {
            Some(dir) => ModelCache::with_custom_cache_dir(dir),
            None => ModelCache::new(),
        };
        cache.context("Failed to open model cache")
    }

    /// Decide whether the configured model has to be downloaded first
    pub(crate) fn model_plan(cli: &Cli, cache: &ModelCache) -> ModelPlan {
        let ModelSource::Downloaded(model_id) = Self::model_spec(cli).source else {
            return ModelPlan::Ready;
        };
        if cache.is_model_cached(&model_id) {
            return ModelPlan::Ready;
        }
        if cli.no_download {
            return ModelPlan::Missing(model_id);
        }

        if is_url(&cli.model) {
            ModelPlan::Download(cli.model.clone())
        } else if model_id == DEFAULT_MODEL_ID {
            ModelPlan::Download(DEFAULT_MODEL_URL.to_string())
        } else {
            ModelPlan::Missing(model_id)
        }
    }
}

fn is_url(arg: &str) -> bool {
    arg.starts_with("https://") || arg.starts_with("http://")
}
