//! Tracing subscriber setup for the server binary
//!
//! The library only emits events; the binary installs exactly one
//! process-wide subscriber at startup through [`TracingConfig::init`].

use std::str::FromStr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Human-readable output with colors
    #[default]
    Console,
    /// Plain single-line output for CI and log collectors without ANSI support
    Compact,
    /// JSON lines with the current span attached
    #[cfg(feature = "tracing-json")]
    Json,
}

impl FromStr for TracingFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "console" => Ok(Self::Console),
            "compact" => Ok(Self::Compact),
            #[cfg(feature = "tracing-json")]
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Tracing configuration builder
#[derive(Debug, Default)]
pub struct TracingConfig {
    /// Verbosity level (`-v` count)
    pub verbosity: u8,
    pub format: TracingFormat,
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Map the `-v` count to a level
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Filter directives used when `RUST_LOG` is not set
    ///
    /// ONNX Runtime logs through `ort` at info level on every session
    /// build, so it is capped at `warn` unless the caller asked for more.
    #[must_use]
    pub fn default_directives(&self) -> String {
        if self.verbosity == 0 {
            "info,ort=warn".to_string()
        } else {
            self.verbosity_to_filter().to_string()
        }
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directives
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(self.default_directives())?,
        };
        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => {
                let fmt_layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            TracingFormat::Compact => {
                let fmt_layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false);
                registry.with(fmt_layer).try_init()?;
            },
        }

        tracing::debug!(format = ?self.format, verbosity = self.verbosity, "Tracing initialized");
        Ok(())
    }
}
