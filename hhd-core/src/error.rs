//! Error types for hhd-core.

use thiserror::Error;

/// Errors raised while reading or writing a [`Config`](crate::config::Config) tree.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The stored value exists but cannot be coerced into the requested type.
    #[error("value at '{path}' cannot be read as {expected}: {source}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        #[source]
        source: serde_yaml::Error,
    },

    /// No value is stored at the requested path.
    #[error("no value at '{path}'")]
    Missing { path: String },

    /// A mapping was required (root or intermediate node) but a scalar was found.
    #[error("'{path}' is not a mapping")]
    NotAMapping { path: String },
}

/// A Config value violates the Settings declared for its path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value at '{path}': {reason}")]
pub struct ValidationError {
    pub path: String,
    pub reason: String,
}

impl ValidationError {
    pub(crate) fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by a plugin from one of its lifecycle hooks.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl PluginError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl From<ConfigError> for PluginError {
    fn from(err: ConfigError) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<std::io::Error> for PluginError {
    fn from(err: std::io::Error) -> Self {
        Self::Other(Box::new(err))
    }
}
