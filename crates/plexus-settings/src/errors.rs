//! Settings error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Why the broker's settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read plexus settings file {}: {source}", path.display())]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The settings file is not valid JSON, or a key has the wrong type.
    #[error("plexus settings file {} is malformed: {source}", path.display())]
    Json {
        /// File the JSON came from.
        path: PathBuf,
        /// Parse or type error, with line and column where known.
        #[source]
        source: serde_json::Error,
    },
    /// A value parsed but would leave the broker unusable.
    #[error("invalid plexus setting: {0}")]
    InvalidValue(String),
}

impl SettingsError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
