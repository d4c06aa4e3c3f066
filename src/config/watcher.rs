//! Configuration file watcher for hot reload.
//!
//! Raw file events are collapsed by a [`Debounce`] state machine so that a
//! burst of writes (an editor save, or our own `save()`) triggers a single
//! reload once the file has been quiet for the debounce delay.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::config::loader::ConfigError;
use crate::config::store::ConfigStore;
use crate::observability::metrics;

/// Default quiet period before a reload.
pub const DEFAULT_RELOAD_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Debounce states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Pending { deadline: Instant },
    /// A reload is running; `dirty` records notifications seen meanwhile.
    Reloading { dirty: bool },
}

/// Timer-reset state machine: `Idle -> Pending -> Reloading -> Idle`.
#[derive(Debug, Clone)]
pub struct Debounce {
    delay: Duration,
    state: DebounceState,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: DebounceState::Idle,
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    /// A change notification arrived. Restarts the timer.
    pub fn notify(&mut self, now: Instant) {
        self.state = match self.state {
            DebounceState::Idle | DebounceState::Pending { .. } => DebounceState::Pending {
                deadline: now + self.delay,
            },
            DebounceState::Reloading { .. } => DebounceState::Reloading { dirty: true },
        };
    }

    /// When the pending timer fires, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Pending { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Returns true exactly once per quiesced burst; the caller must then
    /// reload and call [`Debounce::finish`].
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.state {
            DebounceState::Pending { deadline } if now >= deadline => {
                self.state = DebounceState::Reloading { dirty: false };
                true
            }
            _ => false,
        }
    }

    /// The reload completed, successfully or not.
    pub fn finish(&mut self, now: Instant) {
        self.state = match self.state {
            DebounceState::Reloading { dirty: true } => DebounceState::Pending {
                deadline: now + self.delay,
            },
            _ => DebounceState::Idle,
        };
    }
}

/// Something the watcher can reload.
pub trait Reload: Send + Sync + 'static {
    fn reload(&self) -> Result<(), ConfigError>;
}

impl Reload for ConfigStore {
    fn reload(&self) -> Result<(), ConfigError> {
        self.load().map(|_| ())
    }
}

/// Drive the debounce from a stream of change notifications until the
/// channel closes or shutdown is signalled.
pub async fn run_debounced<R: Reload>(
    target: Arc<R>,
    mut events: mpsc::UnboundedReceiver<()>,
    delay: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut debounce = Debounce::new(delay);

    loop {
        let deadline = debounce.deadline();
        tokio::select! {
            event = events.recv() => match event {
                Some(()) => debounce.notify(Instant::now()),
                None => break,
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if debounce.poll(Instant::now()) {
                    reload(&target).await;
                    debounce.finish(Instant::now());
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!("Config watcher received shutdown signal");
                break;
            }
        }
    }
}

async fn reload<R: Reload>(target: &Arc<R>) {
    tracing::info!("Config file change detected, reloading");
    let target = target.clone();
    match tokio::task::spawn_blocking(move || target.reload()).await {
        Ok(Ok(())) => metrics::record_reload(true),
        Ok(Err(e)) => {
            metrics::record_reload(false);
            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
        }
        Err(e) => {
            metrics::record_reload(false);
            tracing::error!(error = %e, "Config reload task failed");
        }
    }
}

/// Watches the configuration file and feeds [`run_debounced`].
pub struct ConfigWatcher {
    path: PathBuf,
    delay: Duration,
}

impl ConfigWatcher {
    pub fn new(path: &Path, delay: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            delay,
        }
    }

    /// Start watching. Returns the OS watcher, which must be kept alive, or
    /// `None` when the file cannot be observed; the service then keeps its
    /// last configuration until restart.
    pub fn spawn(
        self,
        store: Arc<ConfigStore>,
        shutdown: broadcast::Receiver<()>,
    ) -> Option<RecommendedWatcher> {
        let (tx, rx) = mpsc::unbounded_channel();

        match self.watch(tx) {
            Ok(watcher) => {
                tracing::info!(path = %self.path.display(), debounce = ?self.delay, "Config watcher started");
                tokio::spawn(run_debounced(store, rx, self.delay, shutdown));
                Some(watcher)
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Could not watch config file, hot reload disabled"
                );
                None
            }
        }
    }

    // The parent directory is watched rather than the file itself so the
    // watch survives the rename performed by every save.
    fn watch(&self, tx: mpsc::UnboundedSender<()>) -> Result<RecommendedWatcher, notify::Error> {
        let file_name: OsString = self
            .path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| notify::Error::generic("config path has no file name"))?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = (event.kind.is_modify() || event.kind.is_create())
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == Some(file_name.as_os_str()));
                    if relevant {
                        let _ = tx.send(());
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Config watch error"),
            },
            Config::default(),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }
}
