//! Logging setup: `tracing` subscriber configured from `LOG_TYPE` and `LOG_LEVEL`.
//!
//! Logs go to stderr so command output on stdout stays machine-readable.

#![allow(missing_docs)]

use std::env;
use std::fmt;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt as subscriber_fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::core::errors::{DclError, Result};

pub const LOG_TYPE_VAR: &str = "LOG_TYPE";
pub const LOG_LEVEL_VAR: &str = "LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Parse a `LOG_TYPE` value. Empty means text; anything unknown is an error.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(DclError::ConfigParse {
                context: "env",
                details: format!("{LOG_TYPE_VAR}={other:?} is not valid (expected text or json)"),
            }),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

/// Parse a `LOG_LEVEL` value. Empty or unknown values fall back to info.
#[must_use]
pub fn parse_level(raw: &str) -> LevelFilter {
    match raw.trim().to_ascii_lowercase().as_str() {
        "debug" => LevelFilter::DEBUG,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub format: LogFormat,
    pub level: LevelFilter,
}

impl LogSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(mut lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let format = LogFormat::parse(&lookup(LOG_TYPE_VAR).unwrap_or_default())?;
        let level = parse_level(&lookup(LOG_LEVEL_VAR).unwrap_or_default());
        Ok(Self { format, level })
    }
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init(settings: LogSettings) -> Result<()> {
    let text = (settings.format == LogFormat::Text)
        .then(|| subscriber_fmt::layer().with_writer(std::io::stderr));
    let json = (settings.format == LogFormat::Json).then(|| {
        subscriber_fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(settings.level)
        .with(text)
        .with(json)
        .try_init()
        .map_err(|error| DclError::Runtime {
            details: format!("failed to install log subscriber: {error}"),
        })
}
