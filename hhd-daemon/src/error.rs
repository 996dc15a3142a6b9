use std::path::PathBuf;

use thiserror::Error;

use hhd_core::{PluginError, ValidationError};
use hhd_persist::PersistError;

/// Error surface for the daemon runtime.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("configuration rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error("built-in settings are malformed: {0}")]
    BuiltinSettings(#[source] serde_yaml::Error),

    #[error("plugin `{plugin}` failed to open: {source}")]
    PluginOpen {
        plugin: String,
        #[source]
        source: PluginError,
    },

    #[error("plugin `{plugin}` failed during {stage}: {source}")]
    PluginRuntime {
        plugin: String,
        stage: &'static str,
        #[source]
        source: PluginError,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
