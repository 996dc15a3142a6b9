//! Reload and exit requests.
//!
//! Three sources set the flags in [`Triggers`]: file notifications on the
//! configuration directories, process signals, and the control loop itself
//! (after a `Settings` event). Setting a flag also wakes the loop through
//! the same [`Notify`] the event bus uses.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{io_err, DaemonError};

#[derive(Debug)]
pub struct Triggers {
    reload: AtomicBool,
    exit: AtomicBool,
    wake: Arc<Notify>,
}

impl Triggers {
    pub fn new(wake: Arc<Notify>) -> Self {
        Self {
            reload: AtomicBool::new(false),
            exit: AtomicBool::new(false),
            wake,
        }
    }

    pub fn request_reload(&self) {
        self.reload.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn reload_pending(&self) -> bool {
        self.reload.load(Ordering::SeqCst)
    }

    pub fn clear_reload(&self) {
        self.reload.store(false, Ordering::SeqCst);
    }

    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }

    /// Sleep for `delay`, returning early once exit is requested.
    pub async fn pause(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while !self.exit_requested() {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return,
                _ = self.wake.notified() => {}
            }
        }
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Non-recursive watches on the configuration directories.
///
/// [`ConfigWatch::arm`] replaces the underlying watcher, so every reload
/// starts from fresh watches. Watch failures are logged and otherwise
/// ignored; the daemon keeps running without live reload.
#[derive(Default)]
pub struct ConfigWatch {
    watcher: Option<RecommendedWatcher>,
    watched: Vec<PathBuf>,
}

impl ConfigWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, dirs: &[PathBuf], triggers: Arc<Triggers>) {
        self.disarm();

        let handler = move |event: notify::Result<Event>| match event {
            Ok(event) if is_relevant_event_kind(&event.kind) => triggers.request_reload(),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "watcher event error"),
        };
        let mut watcher = match recommended_watcher(handler) {
            Ok(watcher) => watcher,
            Err(err) => {
                tracing::warn!(error = %err, "could not create file watcher, live reload disabled");
                return;
            }
        };

        for dir in dirs {
            match watcher.watch(dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    tracing::debug!(path = %dir.display(), "watching configuration directory");
                    self.watched.push(dir.clone());
                }
                Err(err) => {
                    tracing::warn!(path = %dir.display(), error = %err, "could not watch directory");
                }
            }
        }
        self.watcher = Some(watcher);
    }

    /// Drop every watch.
    pub fn disarm(&mut self) {
        self.watcher = None;
        self.watched.clear();
    }

    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }
}

/// Route SIGIO (a.k.a. SIGPOLL) to a reload and SIGINT/SIGTERM to exit until
/// `shutdown` fires.
pub fn spawn_signal_listener(
    triggers: Arc<Triggers>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<JoinHandle<()>, DaemonError> {
    let mut reload = signal(SignalKind::io()).map_err(|e| io_err("SIGIO", e))?;
    let mut interrupt = signal(SignalKind::interrupt()).map_err(|e| io_err("SIGINT", e))?;
    let mut terminate = signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM", e))?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = reload.recv() => {
                    tracing::info!("reload signal received");
                    triggers.request_reload();
                }
                _ = interrupt.recv() => {
                    tracing::info!("interrupt received");
                    triggers.request_exit();
                }
                _ = terminate.recv() => {
                    tracing::info!("terminate received");
                    triggers.request_exit();
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn triggers() -> Arc<Triggers> {
        Arc::new(Triggers::new(Arc::new(Notify::new())))
    }

    #[test]
    fn relevant_kinds() {
        use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};
        assert!(is_relevant_event_kind(&EventKind::Create(CreateKind::File)));
        assert!(is_relevant_event_kind(&EventKind::Modify(ModifyKind::Any)));
        assert!(is_relevant_event_kind(&EventKind::Remove(RemoveKind::File)));
        assert!(!is_relevant_event_kind(&EventKind::Access(AccessKind::Any)));
    }

    #[tokio::test]
    async fn request_reload_wakes_a_waiter() {
        let wake = Arc::new(Notify::new());
        let triggers = Triggers::new(Arc::clone(&wake));
        triggers.request_reload();
        // The permit is stored even though nobody was waiting yet.
        tokio::time::timeout(Duration::from_secs(1), wake.notified())
            .await
            .expect("woken");
        assert!(triggers.reload_pending());
        triggers.clear_reload();
        assert!(!triggers.reload_pending());
    }

    #[tokio::test]
    async fn pause_returns_early_on_exit() {
        let triggers = triggers();
        let remote = Arc::clone(&triggers);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.request_exit();
        });

        let started = std::time::Instant::now();
        triggers.pause(Duration::from_secs(10)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(triggers.exit_requested());
    }

    #[tokio::test]
    async fn pause_waits_out_unrelated_wakeups() {
        let triggers = triggers();
        triggers.request_reload();

        let started = std::time::Instant::now();
        triggers.pause(Duration::from_millis(50)).await;
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn file_change_in_watched_dir_requests_reload() {
        let tmp = TempDir::new().unwrap();
        let triggers = triggers();
        let mut watch = ConfigWatch::new();
        watch.arm(&[tmp.path().to_path_buf()], Arc::clone(&triggers));
        assert_eq!(watch.watched(), [tmp.path().to_path_buf()]);

        std::fs::write(tmp.path().join("state.yml"), "a: 1\n").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !triggers.reload_pending() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(triggers.reload_pending());
    }

    #[tokio::test]
    async fn missing_directory_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let mut watch = ConfigWatch::new();
        watch.arm(
            &[tmp.path().join("absent"), tmp.path().to_path_buf()],
            triggers(),
        );
        assert_eq!(watch.watched(), [tmp.path().to_path_buf()]);

        watch.disarm();
        assert!(watch.watched().is_empty());
    }

    #[tokio::test]
    async fn signal_listener_stops_on_shutdown() {
        let (tx, rx) = broadcast::channel(1);
        let handle = spawn_signal_listener(triggers(), rx).unwrap();
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener stopped")
            .unwrap();
    }
}
