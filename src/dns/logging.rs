//! Log output setup
//!
//! Library code logs through the `log` macros. `init_logging` installs a
//! `tracing_subscriber` formatter, which also picks up `log` records, with
//! `RUST_LOG` taking precedence over the configured level.

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Log levels accepted in the settings file
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// Logger configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggerConfig {
    /// Minimum level to emit when `RUST_LOG` is unset
    pub level: LogLevel,
    /// Emit one JSON object per line instead of text
    pub json_format: bool,
}

/// Build the filter for `config`, preferring `RUST_LOG`
pub fn env_filter(config: &LoggerConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.as_str()))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Returns false if a subscriber was already installed, in which case the
/// existing one stays in place.
pub fn init_logging(config: &LoggerConfig) -> bool {
    let filter = env_filter(config);

    let result = if config.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .try_init()
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            log::debug!("logging already initialised: {}", e);
            false
        }
    }
}
