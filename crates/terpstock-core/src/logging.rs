//! Subscriber setup for the `terpstock` binary.
//!
//! Everything in the workspace logs through `tracing` macros with
//! structured fields (`source`, `store`, `run_id`). This module only
//! installs the global subscriber; libraries never call it.
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `TERPSTOCK_LOG_LEVEL` | minimum level (`trace` .. `error`) |
//! | `TERPSTOCK_LOG_FORMAT` | `text` or `json` |
//! | `TERPSTOCK_LOG_FILTER` | extra `EnvFilter` directives, comma separated |

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let level = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(level)
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(ConfigError::invalid("logging.level", format!("unknown level '{value}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::invalid("logging.format", format!("unknown format '{value}'"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Extra directives such as `terpstock_core::adapters=debug`.
    pub filter_directives: Vec<String>,
}

impl LogConfig {
    /// Applies `TERPSTOCK_LOG_*` variables on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(level) = lookup("TERPSTOCK_LOG_LEVEL") {
            self.level = level.parse()?;
        }
        if let Some(format) = lookup("TERPSTOCK_LOG_FORMAT") {
            self.format = format.parse()?;
        }
        if let Some(filter) = lookup("TERPSTOCK_LOG_FILTER") {
            self.filter_directives = filter
                .split(',')
                .map(str::trim)
                .filter(|directive| !directive.is_empty())
                .map(str::to_owned)
                .collect();
        }
        Ok(self)
    }

    fn env_filter(&self) -> Result<EnvFilter, ConfigError> {
        let mut filter = EnvFilter::new(self.level.to_string());
        for directive in &self.filter_directives {
            let parsed = directive.parse().map_err(|error| {
                ConfigError::invalid("logging.filter_directives", format!("'{directive}': {error}"))
            })?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }
}

/// Installs the global subscriber. Output goes to stderr so JSON written to
/// stdout by the CLI stays machine readable.
pub fn init_logging(config: &LogConfig) -> Result<(), ConfigError> {
    let filter = config.env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false).with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|error| ConfigError::Logging(error.to_string()))
}
