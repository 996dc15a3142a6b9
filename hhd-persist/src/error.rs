//! Error types for hhd-persist.

use std::path::PathBuf;

use thiserror::Error;

use hhd_core::{ConfigError, ValidationError};

/// All errors that can arise while loading or saving persisted files.
#[derive(Debug, Error)]
pub enum PersistError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The file parsed, but its top level is not a mapping.
    #[error("unexpected document shape in {path}: {source}")]
    Shape {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },

    /// The file parsed, but a value violates the current settings.
    #[error("{path} does not match the current settings: {source}")]
    Validation {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Convenience constructor for [`PersistError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> PersistError {
    PersistError::Io {
        path: path.into(),
        source,
    }
}
