//! The plugin boundary.
//!
//! Plugins are discovered once at startup from a static registry of
//! constructors and live for the whole daemon lifetime. They talk back to
//! the daemon exclusively through the [`Emitter`] handed to [`Plugin::open`].

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::PluginError;
use crate::event::Emitter;
use crate::settings::Settings;

/// Log tag used for plugins that do not pick one.
pub const DEFAULT_LOG_TAG: &str = "ukwn";

/// A hardware-abstraction plugin (input source, virtual controller, sensor...).
///
/// Lower priorities are "sources" and update first; higher priorities are
/// "sinks" and prepare first.
pub trait Plugin: Send {
    fn name(&self) -> &str;

    fn priority(&self) -> i32;

    /// Short tag attached to every log line emitted during this plugin's hooks.
    fn log_tag(&self) -> &str {
        DEFAULT_LOG_TAG
    }

    /// This plugin's settings fragment. Must be pure.
    fn settings(&self) -> Settings {
        Settings::new()
    }

    fn open(&mut self, emit: Emitter, context: &Context) -> Result<(), PluginError>;

    /// Stage expected output before any producer runs this generation.
    fn prepare(&mut self, _conf: &Config) -> Result<(), PluginError> {
        Ok(())
    }

    /// Read and write the live Config. Writes are visible to later plugins
    /// in the same pass.
    fn update(&mut self, _conf: &mut Config) -> Result<(), PluginError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// A constructor in the static plugin registry.
pub type PluginProvider = fn() -> Vec<Box<dyn Plugin>>;

/// The user whose home anchors the configuration and who owns written files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

impl Context {
    /// The invoking user, identified through the owner of their home directory.
    pub fn current() -> Option<Self> {
        let home = dirs::home_dir()?;
        let meta = fs::metadata(&home).ok()?;
        let name = std::env::var("USER")
            .ok()
            .or_else(|| home.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "root".to_string());
        Some(Self {
            name,
            uid: meta.uid(),
            gid: meta.gid(),
            home,
        })
    }

    /// Look `user` up in the system account database.
    pub fn for_user(user: &str) -> Option<Self> {
        Self::from_passwd(Path::new("/etc/passwd"), user)
    }

    /// Look `user` up in a passwd(5)-formatted file.
    pub fn from_passwd(passwd: &Path, user: &str) -> Option<Self> {
        let contents = fs::read_to_string(passwd).ok()?;
        contents.lines().find_map(|line| parse_passwd_line(line, user))
    }

    /// Expand a leading `~` against this user's home.
    pub fn expand(&self, path: &Path) -> PathBuf {
        match path.strip_prefix("~") {
            Ok(rest) => self.home.join(rest),
            Err(_) => path.to_path_buf(),
        }
    }
}

fn parse_passwd_line(line: &str, user: &str) -> Option<Context> {
    let mut fields = line.split(':');
    let name = fields.next()?;
    if name != user {
        return None;
    }
    let _password = fields.next()?;
    let uid = fields.next()?.parse().ok()?;
    let gid = fields.next()?.parse().ok()?;
    let _gecos = fields.next()?;
    let home = fields.next()?;
    Some(Context {
        name: name.to_string(),
        uid,
        gid,
        home: PathBuf::from(home),
    })
}
