//! Named alternate configurations.
//!
//! # Storage layout
//!
//! ```text
//! <config root>/profiles/
//!   <name>.yml        (one file per profile)
//!   _template.yml     (reserved template, always written)
//!   _<other>.yml      (further templates)
//! ```
//!
//! Names starting with `_` are templates: persisted, but never returned by
//! name-based lookup or apply.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use hhd_core::{validate_config, Config, Settings, ValidationError};

use crate::error::{io_err, PersistError};
use crate::state::{load_profile, save_profile, save_template};
use crate::writer::{HashStore, WriteResult};

pub const TEMPLATE_PREFIX: char = '_';
pub const DEFAULT_TEMPLATE: &str = "_template";
pub const PROFILE_EXTENSION: &str = "yml";

/// The profiles mapping shared with the control surface.
pub type SharedProfiles = Arc<Mutex<BTreeMap<String, Config>>>;

/// What [`ProfileStore::upsert`] did with an incoming profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Merged,
    /// The name cannot be used as a file name; nothing was stored.
    Rejected,
}

pub fn is_template(name: &str) -> bool {
    name.starts_with(TEMPLATE_PREFIX)
}

/// Profile names become file stems, so they may not escape the directory.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

pub struct ProfileStore {
    dir: PathBuf,
    profiles: SharedProfiles,
    templates: BTreeMap<String, Config>,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            profiles: Arc::new(Mutex::new(BTreeMap::new())),
            templates: BTreeMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{PROFILE_EXTENSION}"))
    }

    pub fn shared(&self) -> SharedProfiles {
        Arc::clone(&self.profiles)
    }

    /// Replace the in-memory set with what is on disk.
    ///
    /// Files that fail to load or to validate are logged and skipped.
    /// Returns the loaded profile names (templates excluded).
    pub fn rescan(&mut self, settings: &Settings) -> Result<Vec<String>, PersistError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;

        let mut entries: Vec<_> = std::fs::read_dir(&self.dir)
            .map_err(|e| io_err(&self.dir, e))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|ext| ext.to_str()) == Some(PROFILE_EXTENSION))
            .collect();
        entries.sort();

        let mut profiles = BTreeMap::new();
        let mut templates = BTreeMap::new();
        for path in entries {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned)
            else {
                continue;
            };
            let conf = match load_profile(&path, settings) {
                Ok(conf) => conf,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping profile");
                    continue;
                }
            };
            if is_template(&name) {
                templates.insert(name, conf);
            } else {
                profiles.insert(name, conf);
            }
        }

        let names = profiles.keys().cloned().collect();
        *self.profiles.lock() = profiles;
        self.templates = templates;
        Ok(names)
    }

    /// Insert a profile, or merge `config` into the existing one of the same
    /// name, then validate the result leniently.
    pub fn upsert(
        &mut self,
        name: &str,
        config: Config,
        settings: &Settings,
    ) -> Result<Upsert, ValidationError> {
        if !is_valid_name(name) {
            tracing::warn!(profile = name, "ignoring profile with an unusable name");
            return Ok(Upsert::Rejected);
        }

        if is_template(name) {
            return upsert_into(&mut self.templates, name, config, settings);
        }
        let mut profiles = self.profiles.lock();
        upsert_into(&mut profiles, name, config, settings)
    }

    /// A copy of the named profile. Templates are not visible here.
    pub fn get(&self, name: &str) -> Option<Config> {
        if is_template(name) {
            return None;
        }
        self.profiles.lock().get(name).cloned()
    }

    /// Merge the named profile's leaves into `conf`. Returns false if no
    /// such profile exists.
    pub fn apply_to(&self, name: &str, conf: &mut Config) -> bool {
        if is_template(name) {
            return false;
        }
        match self.profiles.lock().get(name) {
            Some(profile) => {
                conf.update(profile);
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.lock().keys().cloned().collect()
    }

    pub fn template(&self, name: &str) -> Option<&Config> {
        self.templates.get(name)
    }

    /// Persist every profile and template. The default template is always
    /// written, from defaults when none is loaded.
    pub fn save_all(
        &self,
        settings: &Settings,
        store: &mut HashStore,
    ) -> Vec<Result<WriteResult, PersistError>> {
        let mut results = Vec::new();
        {
            let profiles = self.profiles.lock();
            for (name, conf) in profiles.iter() {
                results.push(save_profile(&self.path_for(name), settings, conf, store));
            }
        }
        for (name, conf) in &self.templates {
            if name != DEFAULT_TEMPLATE {
                results.push(save_profile(&self.path_for(name), settings, conf, store));
            }
        }
        results.push(save_template(
            &self.path_for(DEFAULT_TEMPLATE),
            settings,
            self.templates.get(DEFAULT_TEMPLATE),
            store,
        ));
        results
    }
}

fn upsert_into(
    map: &mut BTreeMap<String, Config>,
    name: &str,
    config: Config,
    settings: &Settings,
) -> Result<Upsert, ValidationError> {
    let outcome = match map.get_mut(name) {
        Some(existing) => {
            existing.update(&config);
            Upsert::Merged
        }
        None => {
            map.insert(name.to_owned(), config);
            Upsert::Inserted
        }
    };
    if let Some(stored) = map.get_mut(name) {
        validate_config(stored, settings, false)?;
    }
    Ok(outcome)
}
