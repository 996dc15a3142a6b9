//! # hhd-daemon
//!
//! The control loop that reconciles plugin settings, the persisted state
//! file, profiles and plugin-emitted events into one live configuration.

mod error;
pub mod lifecycle;
pub mod paths;
pub mod reload;
mod runtime;
pub mod surface;

pub use error::DaemonError;
pub use lifecycle::PluginManager;
pub use paths::Timings;
pub use reload::Triggers;
pub use runtime::{
    builtin_settings, init_tracing, run, start_blocking, ControlLoop, DaemonOptions, Generation,
    Phase, DAEMON_LOG_TAG,
};
pub use surface::{ControlSurface, Snapshot, SurfaceError, SurfaceFactory, SurfaceOptions};
