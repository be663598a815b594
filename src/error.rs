//! Error types for refscan

use thiserror::Error;

/// Result type for refscan operations
pub type Result<T> = std::result::Result<T, RefscanError>;

/// Refscan errors
///
/// `SchemaResolution` and `UnknownType` are non-fatal: the builder and the
/// scanner record them as diagnostics/tallies and keep going. Everything else
/// aborts the current phase.
#[derive(Error, Debug)]
pub enum RefscanError {
    #[error("Failed to load schema {path}: {message}")]
    SchemaLoad { path: String, message: String },

    #[error("Invalid schema structure: {0}")]
    SchemaStructure(String),

    #[error("Cannot resolve range of slot {class}.{slot}: {reason}")]
    SchemaResolution {
        class: String,
        slot: String,
        reason: String,
    },

    #[error("Unknown document type: {0}")]
    UnknownType(String),

    #[error("Database unreachable while reading {collection}: {message}")]
    Connectivity { collection: String, message: String },

    #[error("Failed to write report {path}: {message}")]
    ReportWrite { path: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl RefscanError {
    pub fn connectivity(collection: impl Into<String>, message: impl ToString) -> Self {
        Self::Connectivity {
            collection: collection.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error aborts a scan run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::SchemaResolution { .. } | Self::UnknownType(_))
    }
}
