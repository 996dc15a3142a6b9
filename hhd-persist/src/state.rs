//! YAML persistence for the state file and profile files.
//!
//! Only paths declared by the current [`Settings`] are written, so values
//! of plugins that are gone no longer reach disk.

use std::io::ErrorKind;
use std::path::Path;

use serde_yaml::Value;

use hhd_core::config::is_blank_yaml;
use hhd_core::{validate_config, Config, Settings};

use crate::error::{io_err, PersistError};
use crate::writer::{atomic_write, HashStore, WriteResult};

const STATE_HEADER: &str = "\
# Handheld Daemon state.
# Changes to this file are picked up while the daemon runs.
";

const PROFILE_HEADER: &str = "\
# Handheld Daemon profile.
# Only the values listed here are applied when the profile is selected.
";

const TEMPLATE_HEADER: &str = "\
# Handheld Daemon profile template.
# Copy this file under a new name to create a profile, then delete the
# values it should not change.
";

/// Parse a YAML file into a [`Config`] without validating it.
pub fn load_config(path: &Path) -> Result<Config, PersistError> {
    let text = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    parse_config(path, &text)
}

fn parse_config(path: &Path, text: &str) -> Result<Config, PersistError> {
    if is_blank_yaml(text) {
        return Ok(Config::new());
    }
    let value: Value = serde_yaml::from_str(text).map_err(|source| PersistError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Config::from_value(value).map_err(|source| PersistError::Shape {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the state file and validate it strictly, filling in defaults.
///
/// Returns `Ok(None)` when the file does not exist yet.
pub fn load_state(path: &Path, settings: &Settings) -> Result<Option<Config>, PersistError> {
    let mut conf = match load_config(path) {
        Ok(conf) => conf,
        Err(PersistError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
            return Ok(None)
        }
        Err(err) => return Err(err),
    };
    validate_config(&mut conf, settings, true).map_err(|source| PersistError::Validation {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(conf))
}

/// Load a profile and validate it leniently; missing paths stay missing.
pub fn load_profile(path: &Path, settings: &Settings) -> Result<Config, PersistError> {
    let mut conf = load_config(path)?;
    validate_config(&mut conf, settings, false).map_err(|source| PersistError::Validation {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(conf)
}

/// Render `conf` as it would be saved: declared paths only, with `header`.
pub fn render(settings: &Settings, conf: &Config, header: &str) -> Result<String, PersistError> {
    let projected = settings.project(conf);
    let body = if projected.is_empty() {
        String::new()
    } else {
        serde_yaml::to_string(&projected)?
    };
    Ok(format!("{header}{body}"))
}

pub fn save_state(
    path: &Path,
    settings: &Settings,
    conf: &Config,
    store: &mut HashStore,
) -> Result<WriteResult, PersistError> {
    let content = render(settings, conf, STATE_HEADER)?;
    atomic_write(path, &content, store)
}

pub fn save_profile(
    path: &Path,
    settings: &Settings,
    conf: &Config,
    store: &mut HashStore,
) -> Result<WriteResult, PersistError> {
    let content = render(settings, conf, PROFILE_HEADER)?;
    atomic_write(path, &content, store)
}

/// Save a template; without one in memory, the template lists every default.
pub fn save_template(
    path: &Path,
    settings: &Settings,
    conf: Option<&Config>,
    store: &mut HashStore,
) -> Result<WriteResult, PersistError> {
    let content = match conf {
        Some(conf) => render(settings, conf, TEMPLATE_HEADER)?,
        None => render(settings, &settings.defaults(), TEMPLATE_HEADER)?,
    };
    atomic_write(path, &content, store)
}
