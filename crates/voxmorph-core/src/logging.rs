//! Structured logging setup for hosts of the engine.
//!
//! The engine itself only emits `tracing` events (training progress,
//! elimination counts, pass transitions). Embedding applications can wire
//! those to any subscriber they like; [`init_logging`] offers a ready-made
//! one for tools and tests.
//!
//! ```rust,ignore
//! use voxmorph_core::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default());
//! tracing::info!(entries = 1024, "codebook loaded");
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log level threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Machine-readable JSON lines.
    Json,
    /// Human-readable, single line per event.
    #[default]
    Compact,
}

/// Subscriber configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Custom `EnvFilter` directive string; overrides `level` when set.
    pub filter: Option<String>,
}

/// Initialize the global tracing subscriber. Call once at startup;
/// subsequent calls are ignored. The `RUST_LOG` environment variable takes
/// precedence over the configured level.
pub fn init_logging(config: &LogConfig) {
    let filter = if let Some(custom) = &config.filter {
        EnvFilter::try_new(custom).unwrap_or_else(|_| EnvFilter::new(config.level.to_string()))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()))
    };

    let result = match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(filter).with(fmt::layer().json()),
        ),
        LogFormat::Compact => tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(filter).with(fmt::layer().compact()),
        ),
    };

    // A second initialization keeps the first subscriber.
    let _ = result;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_display() {
        assert_eq!(LogLevel::Debug.to_string(), "debug");
        assert_eq!(LogLevel::Error.to_string(), "error");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_logging(&LogConfig::default());
        init_logging(&LogConfig {
            level: LogLevel::Trace,
            format: LogFormat::Json,
            filter: None,
        });
    }
}
