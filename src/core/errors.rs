//! GUR-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, RollupError>;

/// Top-level error type for the index walker and rollup engine.
#[derive(Debug, Error)]
pub enum RollupError {
    #[error("[GUR-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[GUR-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[GUR-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[GUR-2001] cannot open index database {path}: {details}")]
    DatabaseOpen { path: PathBuf, details: String },

    #[error("[GUR-2002] index database {path} has no root summary row")]
    MissingSummary { path: PathBuf },

    #[error("[GUR-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[GUR-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[GUR-3001] not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("[GUR-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[GUR-3003] task pool failure: {details}")]
    Pool { details: String },

    #[error("[GUR-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl RollupError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "GUR-1001",
            Self::MissingConfig { .. } => "GUR-1002",
            Self::ConfigParse { .. } => "GUR-1003",
            Self::DatabaseOpen { .. } => "GUR-2001",
            Self::MissingSummary { .. } => "GUR-2002",
            Self::Serialization { .. } => "GUR-2101",
            Self::Sql { .. } => "GUR-2102",
            Self::NotADirectory { .. } => "GUR-3001",
            Self::Io { .. } => "GUR-3002",
            Self::Pool { .. } => "GUR-3003",
            Self::Runtime { .. } => "GUR-3900",
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

    /// Attach a SQL context label to a rusqlite failure.
    #[must_use]
    pub fn sql(context: &'static str, source: &rusqlite::Error) -> Self {
        Self::Sql {
            context,
            details: source.to_string(),
        }
    }
}

impl From<rusqlite::Error> for RollupError {
    fn from(value: rusqlite::Error) -> Self {
        Self::sql("rusqlite", &value)
    }
}

impl From<serde_json::Error> for RollupError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for RollupError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
