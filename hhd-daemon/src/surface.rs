//! The optional remote control surface (an HTTP API in practice).
//!
//! The daemon owns at most one running surface. It is (re)created only
//! when the `hhd.http` subtree changes at a reload, and it receives a fresh
//! snapshot after every generation. Surface failures are logged; they never
//! stop the daemon.

use std::path::PathBuf;

use serde_yaml::Value;

use hhd_core::{Config, ConfigError, Context, Emitter, Settings};
use hhd_persist::perms::fix_owner;
use hhd_persist::token::{generate_token, write_token};
use hhd_persist::SharedProfiles;

pub const SURFACE_LOG_TAG: &str = "rest";
pub const HTTP_SECTION: &str = "hhd.http";

pub type SurfaceError = Box<dyn std::error::Error + Send + Sync>;

/// Parameters a surface is started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceOptions {
    pub localhost: bool,
    pub port: u16,
    /// Clients must present this token when set.
    pub token: Option<String>,
}

/// What the surface may read, and the emitter it writes back through.
pub struct Snapshot<'a> {
    pub settings: &'a Settings,
    pub conf: &'a Config,
    pub profiles: &'a SharedProfiles,
    pub emit: &'a Emitter,
}

pub trait ControlSurface: Send {
    fn open(&mut self) -> Result<(), SurfaceError>;

    /// Latest schema, Config and profiles. Called before `open` and after
    /// every generation.
    fn update(&mut self, snapshot: &Snapshot<'_>);

    fn close(&mut self);
}

pub type SurfaceFactory = Box<dyn FnMut(SurfaceOptions) -> Box<dyn ControlSurface> + Send>;

pub(crate) struct SurfaceHost {
    factory: Option<SurfaceFactory>,
    active: Option<Box<dyn ControlSurface>>,
    applied: Option<Value>,
    token_path: PathBuf,
}

impl SurfaceHost {
    pub(crate) fn new(factory: Option<SurfaceFactory>, token_path: PathBuf) -> Self {
        Self {
            factory,
            active: None,
            applied: None,
            token_path,
        }
    }

    pub(crate) fn set_factory(&mut self, factory: SurfaceFactory) {
        self.factory = Some(factory);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Restart the surface if `hhd.http` differs from what it was last
    /// started with.
    pub(crate) fn reconcile(&mut self, snapshot: &Snapshot<'_>, ctx: &Context) {
        let current = snapshot.conf.get(HTTP_SECTION).cloned();
        if current == self.applied {
            return;
        }
        self.applied = current;
        self.close();

        if self.factory.is_none() {
            return;
        }
        let span = tracing::info_span!("plugin", tag = SURFACE_LOG_TAG);
        let _enter = span.enter();

        let settings = match read_options(snapshot.conf) {
            Ok(Some(settings)) => settings,
            Ok(None) => return,
            Err(err) => {
                tracing::error!(error = %err, "invalid control surface settings");
                return;
            }
        };
        let token = if settings.use_token {
            match self.issue_token(ctx) {
                Some(token) => Some(token),
                None => return,
            }
        } else {
            tracing::warn!("control surface runs without an access token");
            None
        };
        let options = SurfaceOptions {
            localhost: settings.localhost,
            port: settings.port,
            token,
        };

        let Some(factory) = self.factory.as_mut() else {
            return;
        };
        let mut surface = factory(options.clone());
        surface.update(snapshot);
        match surface.open() {
            Ok(()) => {
                tracing::info!(
                    port = options.port,
                    localhost = options.localhost,
                    "control surface started"
                );
                self.active = Some(surface);
            }
            Err(err) => tracing::error!(error = %err, "could not start control surface"),
        }
    }

    pub(crate) fn publish(&mut self, snapshot: &Snapshot<'_>) {
        if let Some(surface) = self.active.as_mut() {
            let span = tracing::info_span!("plugin", tag = SURFACE_LOG_TAG);
            let _enter = span.enter();
            surface.update(snapshot);
        }
    }

    pub(crate) fn close(&mut self) {
        if let Some(mut surface) = self.active.take() {
            let span = tracing::info_span!("plugin", tag = SURFACE_LOG_TAG);
            let _enter = span.enter();
            surface.close();
            tracing::info!("control surface stopped");
        }
    }

    fn issue_token(&self, ctx: &Context) -> Option<String> {
        let token = generate_token();
        match write_token(&self.token_path, &token) {
            Ok(()) => {
                fix_owner(&self.token_path, ctx);
                Some(token)
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    "could not write access token, control surface not started"
                );
                None
            }
        }
    }
}

struct HttpSettings {
    localhost: bool,
    port: u16,
    use_token: bool,
}

fn read_options(conf: &Config) -> Result<Option<HttpSettings>, ConfigError> {
    let enabled = conf.contains("hhd.http.enable") && conf.to::<bool>("hhd.http.enable")?;
    if !enabled {
        return Ok(None);
    }
    Ok(Some(HttpSettings {
        localhost: conf.to("hhd.http.localhost")?,
        port: conf.to("hhd.http.port")?,
        use_token: conf.to("hhd.http.token")?,
    }))
}
