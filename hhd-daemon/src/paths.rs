use std::path::{Path, PathBuf};
use std::time::Duration;

use hhd_core::Context;

pub const CONFIG_DIR_ENV: &str = "HHD_CONFIG_DIR";
pub const DEFAULT_CONFIG_DIR: &str = "~/.config/hhd";

pub const STATE_FILE: &str = "state.yml";
pub const PROFILES_DIR: &str = "profiles";
pub const TOKEN_FILE: &str = "token";

/// Upper bound on how long the loop sleeps without events.
pub const POLL_DELAY: Duration = Duration::from_secs(2);
/// Lets external writers finish multi-file saves before a reload reads them.
pub const RELOAD_DEBOUNCE: Duration = Duration::from_secs(2);
/// Time for the notifications caused by our own saves to arrive.
pub const MODIFY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub poll: Duration,
    pub debounce: Duration,
    pub settle: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll: POLL_DELAY,
            debounce: RELOAD_DEBOUNCE,
            settle: MODIFY_DELAY,
        }
    }
}

/// `$HHD_CONFIG_DIR`, else `~/.config/hhd`, with `~` expanded for `ctx`.
pub fn config_root(ctx: &Context) -> PathBuf {
    config_root_from(std::env::var(CONFIG_DIR_ENV).ok().as_deref(), ctx)
}

pub fn config_root_from(value: Option<&str>, ctx: &Context) -> PathBuf {
    let raw = value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(DEFAULT_CONFIG_DIR);
    ctx.expand(Path::new(raw))
}

pub fn state_path(root: &Path) -> PathBuf {
    root.join(STATE_FILE)
}

pub fn profiles_dir(root: &Path) -> PathBuf {
    root.join(PROFILES_DIR)
}

pub fn token_path(root: &Path) -> PathBuf {
    root.join(TOKEN_FILE)
}
