//! Log output of the executor.

use std::env;
use std::str::FromStr;
use strata_core::error::{Result, StrataError};
use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event, with the fields of the enclosing request
    /// and segment spans.
    Json,
    /// Single-line text.
    #[default]
    Text,
}

impl FromStr for LogFormat {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "compact" => Ok(Self::Text),
            other => Err(StrataError::ConfigValue {
                field: "log_format".to_string(),
                cause: format!("unknown format '{other}', expected json or text"),
            }),
        }
    }
}

/// What to log and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives, e.g. `info,strata_executor::orchestrator=debug`.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new(LogFormat::default(), "info")
    }
}

impl LogConfig {
    pub fn new(format: LogFormat, filter: impl Into<String>) -> Self {
        Self {
            format,
            filter: filter.into(),
        }
    }

    /// Read `STRATA_LOG_FORMAT` and `STRATA_LOG`, falling back to `RUST_LOG`
    /// for the filter.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(format) = env::var("STRATA_LOG_FORMAT") {
            config.format = format.parse()?;
        }
        if let Ok(filter) = env::var("STRATA_LOG").or_else(|_| env::var("RUST_LOG")) {
            config.filter = filter;
        }
        Ok(config)
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.filter).map_err(|e| StrataError::ConfigValue {
            field: "log_filter".to_string(),
            cause: e.to_string(),
        })
    }
}

/// Subscriber writing to `writer`.
pub fn subscriber<W>(config: &LogConfig, writer: W) -> Result<Box<dyn Subscriber + Send + Sync>>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let registry = tracing_subscriber::registry().with(config.env_filter()?);
    Ok(match config.format {
        LogFormat::Json => Box::new(
            registry.with(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            ),
        ),
        LogFormat::Text => Box::new(registry.with(fmt::layer().compact().with_writer(writer))),
    })
}

/// Install the global subscriber, writing to stderr.
///
/// Returns `false` when another subscriber was installed first; it is kept.
pub fn init_logging(config: &LogConfig) -> Result<bool> {
    let subscriber = subscriber(config, std::io::stderr)?;
    Ok(tracing::subscriber::set_global_default(subscriber).is_ok())
}
