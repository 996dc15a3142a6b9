//! The reconciliation control loop.
//!
//! ```text
//! STARTING -> [RELOADING] -> PROCESSING_EVENTS -> RUNNING_PLUGINS -> SAVING
//!     ^                                                               |
//!     +------------------------------ WAITING <-----------------------+
//! ```
//!
//! One pass from RELOADING (or PROCESSING_EVENTS) to SAVING is a
//! generation. Any state moves to STOPPING once exit is requested or a
//! generation fails; STOPPING closes the surface and every opened plugin
//! exactly once.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, Notify};
use tracing::Instrument;

use hhd_core::{validate_config, Config, Context, Emitter, Event, EventBus, Plugin, Settings};
use hhd_persist::perms::fix_owner;
use hhd_persist::state::{load_state, save_state};
use hhd_persist::{HashStore, PersistError, ProfileStore, Upsert, WriteResult};

use crate::error::{io_err, DaemonError};
use crate::lifecycle::PluginManager;
use crate::paths::{self, Timings};
use crate::reload::{spawn_signal_listener, ConfigWatch, Triggers};
use crate::surface::{Snapshot, SurfaceFactory, SurfaceHost};

pub const DAEMON_LOG_TAG: &str = "main";

const BUILTIN_SETTINGS: &str = include_str!("settings.yml");

/// The daemon's own settings fragment (`hhd.*`).
pub fn builtin_settings() -> Result<Settings, DaemonError> {
    Settings::from_yaml(BUILTIN_SETTINGS).map_err(DaemonError::BuiltinSettings)
}

#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub root: PathBuf,
    pub context: Context,
    pub timings: Timings,
}

impl DaemonOptions {
    /// Options for `ctx` with the configuration root resolved from the
    /// environment.
    pub fn for_context(context: Context) -> Self {
        Self {
            root: paths::config_root(&context),
            context,
            timings: Timings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Reloading,
    ProcessingEvents,
    RunningPlugins,
    Saving,
    Waiting,
    Stopping,
    Stopped,
}

/// What a single generation did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    pub reloaded: bool,
    /// A `Settings` event arrived; plugins were skipped and a reload is due.
    pub settings_changed: bool,
    pub ran_plugins: bool,
    /// At least one file on disk changed.
    pub saved: bool,
}

pub struct ControlLoop {
    options: DaemonOptions,
    plugins: PluginManager,
    bus: EventBus,
    emitter: Emitter,
    wake: Arc<Notify>,
    triggers: Arc<Triggers>,
    settings: Settings,
    conf: Config,
    profiles: ProfileStore,
    hashes: HashStore,
    watch: ConfigWatch,
    surface: SurfaceHost,
    shutdown_tx: broadcast::Sender<()>,
    phase: Phase,
    initial: bool,
}

impl ControlLoop {
    pub fn new(options: DaemonOptions, plugins: Vec<Box<dyn Plugin>>) -> Self {
        Self::with_manager(options, PluginManager::new(plugins))
    }

    pub fn with_manager(options: DaemonOptions, plugins: PluginManager) -> Self {
        let wake = Arc::new(Notify::new());
        let bus = EventBus::with_wake(Arc::clone(&wake));
        let emitter = bus.emitter();
        let triggers = Arc::new(Triggers::new(Arc::clone(&wake)));
        let profiles = ProfileStore::new(paths::profiles_dir(&options.root));
        let surface = SurfaceHost::new(None, paths::token_path(&options.root));
        let (shutdown_tx, _) = broadcast::channel(4);

        Self {
            options,
            plugins,
            bus,
            emitter,
            wake,
            triggers,
            settings: Settings::new(),
            conf: Config::new(),
            profiles,
            hashes: HashStore::new(),
            watch: ConfigWatch::new(),
            surface,
            shutdown_tx,
            phase: Phase::Starting,
            initial: true,
        }
    }

    pub fn with_surface(mut self, factory: SurfaceFactory) -> Self {
        self.surface.set_factory(factory);
        self
    }

    pub fn emitter(&self) -> Emitter {
        self.emitter.clone()
    }

    pub fn triggers(&self) -> Arc<Triggers> {
        Arc::clone(&self.triggers)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &Config {
        &self.conf
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn surface_active(&self) -> bool {
        self.surface.is_active()
    }

    /// Open every plugin in priority order.
    pub fn start(&mut self) -> Result<(), DaemonError> {
        self.phase = Phase::Starting;
        tracing::info!(
            plugins = %self.plugins.names().join(", "),
            "Loaded plugins"
        );
        tracing::info!(
            user = %self.options.context.name,
            uid = self.options.context.uid,
            home = %self.options.context.home.display(),
            "running for user"
        );
        std::fs::create_dir_all(&self.options.root)
            .map_err(|e| io_err(&self.options.root, e))?;
        self.plugins.open_all(&self.emitter, &self.options.context)
    }

    /// Run generations until exit is requested or one fails, then stop.
    pub async fn run(&mut self) -> Result<(), DaemonError> {
        let result = self.drive().await;
        if let Err(err) = &result {
            tracing::error!(error = %err, "stopping after error");
        }
        self.shutdown();
        result
    }

    async fn drive(&mut self) -> Result<(), DaemonError> {
        self.start()?;
        let _signals = spawn_signal_listener(self.triggers(), self.shutdown_tx.subscribe())?;

        while !self.triggers.exit_requested() {
            let span = tracing::info_span!("plugin", tag = DAEMON_LOG_TAG);
            let generation = self.generation().instrument(span).await?;
            self.wait(&generation).await;
        }
        tracing::info!("exit requested, stopping plugins");
        Ok(())
    }

    /// One pass of the loop: reload if needed, apply queued events,
    /// validate, run plugins and persist.
    pub async fn generation(&mut self) -> Result<Generation, DaemonError> {
        let mut report = Generation::default();

        if self.initial || self.triggers.reload_pending() {
            if !self.initial {
                self.triggers.pause(self.options.timings.debounce).await;
                if self.triggers.exit_requested() {
                    return Ok(report);
                }
            }
            self.initial = false;
            self.reload()?;
            report.reloaded = true;
        }

        self.phase = Phase::ProcessingEvents;
        let events = self.bus.get_events(false).await;
        report.settings_changed = self.apply_events(events)?;
        validate_config(&mut self.conf, &self.settings, true)?;

        if report.settings_changed {
            tracing::info!("settings changed, reloading before the next plugin pass");
            self.triggers.request_reload();
        } else {
            self.phase = Phase::RunningPlugins;
            self.plugins.prepare_all(&self.conf)?;
            self.plugins.update_all(&mut self.conf)?;
            report.ran_plugins = true;
        }

        self.phase = Phase::Saving;
        let reload_requested = self.triggers.reload_pending();
        report.saved = self.save();
        if report.saved && !reload_requested {
            // Swallow the notifications our own writes produced.
            tokio::time::sleep(self.options.timings.settle).await;
            self.triggers.clear_reload();
        }

        let profiles = self.profiles.shared();
        self.surface.publish(&Snapshot {
            settings: &self.settings,
            conf: &self.conf,
            profiles: &profiles,
            emit: &self.emitter,
        });
        Ok(report)
    }

    /// Sleep until an event, a reload/exit request, or the poll delay,
    /// unless the last generation left work that must run immediately.
    pub async fn wait(&mut self, last: &Generation) {
        if self.triggers.exit_requested()
            || last.settings_changed
            || self.triggers.reload_pending()
            || self.bus.has_events()
        {
            return;
        }
        self.phase = Phase::Waiting;
        let _ = tokio::time::timeout(self.options.timings.poll, self.wake.notified()).await;
    }

    /// Stop the surface and close every opened plugin. Runs once; later
    /// calls (including the one from `Drop`) do nothing.
    pub fn shutdown(&mut self) {
        if self.phase == Phase::Stopped {
            return;
        }
        self.phase = Phase::Stopping;
        let _ = self.shutdown_tx.send(());
        self.watch.disarm();
        self.surface.close();
        self.plugins.close_all();
        self.phase = Phase::Stopped;
        tracing::info!("stopped");
    }

    fn reload(&mut self) -> Result<(), DaemonError> {
        self.phase = Phase::Reloading;
        tracing::info!(root = %self.options.root.display(), "Reloading configuration");

        let mut fragments = self.plugins.settings();
        fragments.push(builtin_settings()?);
        self.settings = Settings::merge(fragments);
        self.hashes.clear();

        let state_path = paths::state_path(&self.options.root);
        match load_state(&state_path, &self.settings) {
            Ok(Some(conf)) => self.conf = conf,
            Ok(None) => self.fall_back("no state file"),
            Err(err) => {
                tracing::warn!(error = %err, "could not load state");
                self.fall_back("state file rejected");
            }
        }

        match self.profiles.rescan(&self.settings) {
            Ok(names) if names.is_empty() => tracing::info!("No profiles found"),
            Ok(names) => tracing::info!(profiles = %names.join(", "), "Loaded profiles"),
            Err(err) => tracing::warn!(error = %err, "could not load profiles"),
        }
        fix_owner(self.profiles.dir(), &self.options.context);

        let profiles = self.profiles.shared();
        self.surface.reconcile(
            &Snapshot {
                settings: &self.settings,
                conf: &self.conf,
                profiles: &profiles,
                emit: &self.emitter,
            },
            &self.options.context,
        );

        let dirs = [
            self.options.root.clone(),
            self.profiles.dir().to_path_buf(),
        ];
        let triggers = self.triggers();
        self.watch.arm(&dirs, triggers);
        self.triggers.clear_reload();
        tracing::info!("Initialization Complete!");
        Ok(())
    }

    fn fall_back(&mut self, reason: &str) {
        if self.conf.is_empty() {
            tracing::info!(reason, "using default configuration");
            self.conf = self.settings.defaults();
        } else {
            tracing::warn!(reason, "keeping the previous configuration");
        }
    }

    /// Returns whether a `Settings` event was among `events`.
    fn apply_events(&mut self, events: Vec<Event>) -> Result<bool, DaemonError> {
        let mut settings_changed = false;
        for event in events {
            match event {
                Event::Settings => settings_changed = true,
                Event::Profile { name, config } => {
                    match self.profiles.upsert(&name, config, &self.settings)? {
                        Upsert::Inserted => tracing::info!(profile = %name, "profile created"),
                        Upsert::Merged => tracing::debug!(profile = %name, "profile updated"),
                        Upsert::Rejected => {}
                    }
                }
                Event::Apply { name } => {
                    if self.profiles.apply_to(&name, &mut self.conf) {
                        tracing::info!(profile = %name, "applied profile");
                    } else {
                        tracing::warn!(profile = %name, "cannot apply unknown profile");
                    }
                }
                Event::State { config } => self.conf.update(&config),
            }
        }
        Ok(settings_changed)
    }

    /// Persist state, profiles and templates. Returns whether anything on
    /// disk changed.
    fn save(&mut self) -> bool {
        let mut results = vec![save_state(
            &paths::state_path(&self.options.root),
            &self.settings,
            &self.conf,
            &mut self.hashes,
        )];
        results.extend(self.profiles.save_all(&self.settings, &mut self.hashes));

        let mut saved = false;
        for result in results {
            saved |= self.settle_write(result);
        }
        saved
    }

    fn settle_write(&self, result: Result<WriteResult, PersistError>) -> bool {
        match result {
            Ok(WriteResult::Written { path }) => {
                fix_owner(&path, &self.options.context);
                true
            }
            Ok(WriteResult::Unchanged { .. }) => false,
            Err(err) => {
                tracing::warn!(error = %err, "could not save");
                false
            }
        }
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run the daemon until exit. With no plugins there is nothing to manage,
/// so it logs and returns.
pub async fn run(
    options: DaemonOptions,
    plugins: PluginManager,
    surface: Option<SurfaceFactory>,
) -> Result<(), DaemonError> {
    if plugins.is_empty() {
        tracing::error!("No plugins started, exiting");
        return Ok(());
    }
    let mut control = ControlLoop::with_manager(options, plugins);
    if let Some(factory) = surface {
        control = control.with_surface(factory);
    }
    control.run().await
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(
    options: DaemonOptions,
    plugins: PluginManager,
    surface: Option<SurfaceFactory>,
) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(options, plugins, surface))
}

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
