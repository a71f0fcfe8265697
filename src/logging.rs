//! Logging setup for applications embedding the filters.
//!
//! Events are emitted under the `sqlfault` target:
//! - `debug` when a rule classifies an error or a rollback cause is recorded
//! - `trace` when no rule matches
//! - `warn` when an error is wrapped as generic
//!
//! Hosts that already install a subscriber need nothing from this module.
//! [`init_logging`] is for those that don't; it writes to stderr and defers
//! to `RUST_LOG` when that is set.

use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

/// Target used by every event this crate emits.
pub const LOG_TARGET: &str = "sqlfault";

/// Log level for the `sqlfault` target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    /// Generic wraps only.
    #[default]
    Warn,
    Error,
    Off,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

/// Line layout of the stderr formatter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-field layout with the event target.
    #[default]
    Full,
    /// One short line per event, no target.
    Compact,
}

/// The `[logging]` section of the filter configuration.
///
/// ```toml
/// [logging]
/// level = "debug"
/// format = "compact"
/// timestamps = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            timestamps: true,
        }
    }
}

impl LoggingConfig {
    /// The `EnvFilter` directive used when `RUST_LOG` is not set.
    pub fn directive(&self) -> String {
        format!("{}={}", LOG_TARGET, self.level.as_str())
    }

    fn env_filter(&self) -> EnvFilter {
        match std::env::var("RUST_LOG") {
            Ok(_) => EnvFilter::from_default_env(),
            Err(_) => EnvFilter::new(self.directive()),
        }
    }
}

/// Installs a global stderr formatter for the `sqlfault` target.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(
    config: &LoggingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(config.env_filter())
        .with_writer(std::io::stderr);

    match (config.format, config.timestamps) {
        (LogFormat::Full, true) => builder.try_init(),
        (LogFormat::Full, false) => builder.without_time().try_init(),
        (LogFormat::Compact, true) => builder.compact().with_target(false).try_init(),
        (LogFormat::Compact, false) => builder
            .compact()
            .with_target(false)
            .without_time()
            .try_init(),
    }
}
