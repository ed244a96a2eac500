//! DCL-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DclError>;

/// Top-level error type for docker-cleaner.
#[derive(Debug, Error)]
pub enum DclError {
    #[error("[DCL-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DCL-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DCL-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DCL-2001] filesystem stats failure for {path}: {details}")]
    FsStats { path: PathBuf, details: String },

    #[error("[DCL-2002] engine {operation} failed: {details}")]
    Engine {
        operation: &'static str,
        details: String,
    },

    #[error("[DCL-2003] engine unreachable: {details}")]
    EngineUnavailable { details: String },

    #[error("[DCL-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DCL-3001] cannot bind metrics listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("[DCL-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DCL-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl DclError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DCL-1001",
            Self::MissingConfig { .. } => "DCL-1002",
            Self::ConfigParse { .. } => "DCL-1003",
            Self::FsStats { .. } => "DCL-2001",
            Self::Engine { .. } => "DCL-2002",
            Self::EngineUnavailable { .. } => "DCL-2003",
            Self::Serialization { .. } => "DCL-2101",
            Self::Bind { .. } => "DCL-3001",
            Self::Io { .. } => "DCL-3002",
            Self::Runtime { .. } => "DCL-3900",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for a failed engine call.
    #[must_use]
    pub fn engine(operation: &'static str, details: impl ToString) -> Self {
        Self::Engine {
            operation,
            details: details.to_string(),
        }
    }
}

impl From<serde_json::Error> for DclError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DclError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
