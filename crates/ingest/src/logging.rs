//! Logging setup.
//!
//! Installs a global `tracing` subscriber with an [`EnvFilter`] and either a
//! human-readable or a JSON formatter. `RUST_LOG`, when set, takes precedence
//! over the configured level.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

pub(crate) fn parse_format(format: &str) -> anyhow::Result<LogFormat> {
    match format.to_lowercase().as_str() {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        _ => Err(anyhow::anyhow!("Invalid log format: {}", format)),
    }
}

pub(crate) fn normalize_level(level: &str) -> anyhow::Result<&'static str> {
    match level.to_uppercase().as_str() {
        "TRACE" => Ok("trace"),
        "DEBUG" => Ok("debug"),
        "INFO" => Ok("info"),
        "WARN" | "WARNING" => Ok("warn"),
        "ERROR" => Ok("error"),
        _ => Err(anyhow::anyhow!("Invalid log level: {}", level)),
    }
}

/// Initialize the global logging subscriber.
///
/// Calling this again after a subscriber is installed is a no-op.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = normalize_level(&config.level)?;
    let format = parse_format(&config.format)?;
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = match format {
        LogFormat::Text => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_ansi(config.colors)
                .with_target(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()
        }
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_span_list(true)
                .with_current_span(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()
        }
    };

    if result.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
    Ok(())
}
