//! Handheld daemon core: configuration tree, settings schema, events, plugins.
//!
//! - [`config`]: [`Config`], the live value tree
//! - [`settings`]: [`Settings`] schema and [`validate_config`]
//! - [`event`]: [`Event`], [`EventBus`], [`Emitter`]
//! - [`plugin`]: the [`Plugin`] trait and user [`Context`]
//! - [`error`]: error types

pub mod config;
pub mod error;
pub mod event;
pub mod plugin;
pub mod settings;

pub use config::Config;
pub use error::{ConfigError, PluginError, ValidationError};
pub use event::{Emitter, Event, EventBus};
pub use plugin::{Context, Plugin, PluginProvider, DEFAULT_LOG_TAG};
pub use settings::{validate_config, Setting, SettingKind, Settings};
