//! Error types for rusty_deflator

use thiserror::Error;

/// Main error type for rusty_deflator
#[derive(Error, Debug)]
pub enum DeflateError {
    /// Malformed, empty, or unreadable upstream dataset. Carries the source name.
    #[error("Data source error [{source_name}]: {message}")]
    DataSource {
        source_name: String,
        message: String,
    },

    /// Invalid user-supplied parameter. Carries the offending parameter name.
    /// Raised synchronously, before any data movement.
    #[error("Configuration error [{parameter}]: {message}")]
    Configuration { parameter: String, message: String },

    /// Local cache read/write failure: disk full, permission denied, lock timeout.
    #[error("Cache error: {0}")]
    Cache(String),

    /// A structurally valid request for which no data exists at all
    /// (e.g. the base year is entirely absent). Per-row gaps are nulls, not errors.
    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl DeflateError {
    /// Shorthand for a data-source error
    pub fn data_source(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        DeflateError::DataSource {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a configuration error
    pub fn configuration(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        DeflateError::Configuration {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for rusty_deflator operations
pub type Result<T> = std::result::Result<T, DeflateError>;
