//! Configuration file watcher for hot reload.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::loader::{load_config, ConfigError};
use crate::config::store::ConfigStore;
use crate::observability::logging::{Field, Logger};

/// Quiet period after the first event of a burst. An in-place save is a
/// truncate followed by a write; reading between the two sees an empty file.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Reloads one configuration file into a [`ConfigStore`] whenever it changes.
#[derive(Clone)]
pub struct ConfigWatcher {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    store: ConfigStore,
    logger: Logger,
}

/// Keeps the watch alive. Dropping it stops watching.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Whether the reload task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>, store: ConfigStore, logger: Logger) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.into(),
                store,
                logger,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Re-read the file and install it on success.
    ///
    /// Logs one Info record on success and one Error record on failure. A
    /// failed reload leaves the current snapshot in place.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let path = &self.inner.path;
        let logger = &self.inner.logger;

        match load_config(path) {
            Ok(candidate) => {
                self.inner.store.replace(candidate);
                logger.info(
                    "config reloaded",
                    &[
                        Field::new("path", path.display()),
                        Field::new("generation", self.inner.store.generation()),
                    ],
                );
                Ok(())
            }
            Err(e) => {
                logger.error(
                    "config reload failed, keeping current configuration",
                    &[
                        Field::new("path", path.display()),
                        Field::new("error", &e),
                    ],
                );
                Err(e)
            }
        }
    }

    /// Start watching in the background.
    ///
    /// The notify callback only queues a wake-up; reloading happens on a
    /// tokio task so neither the notify thread nor request tasks block on
    /// file IO. Must be called from within a tokio runtime.
    pub fn spawn(self) -> Result<WatchHandle, ConfigError> {
        let (tx, rx) = mpsc::unbounded_channel::<()>();
        let file_name = self.inner.path.file_name().map(OsString::from);
        let logger = self.inner.logger.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if (event.kind.is_modify() || event.kind.is_create())
                        && touches(&event, file_name.as_deref())
                    {
                        let _ = tx.send(());
                    }
                }
                Err(e) => logger.error("config watch error", &[Field::new("error", e)]),
            }
        })?;

        // Editors often save by renaming over the file, which drops a watch
        // on the file itself; watch its directory instead.
        let dir = match self.inner.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        self.inner
            .logger
            .info("config watcher started", &[Field::new("path", self.inner.path.display())]);

        let task = tokio::spawn(self.run(rx));
        Ok(WatchHandle {
            _watcher: watcher,
            task,
        })
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<()>) {
        while rx.recv().await.is_some() {
            // A single save can fire several events; the file's latest
            // state is all that matters, so collapse whatever is queued.
            tokio::time::sleep(SETTLE_DELAY).await;
            while rx.try_recv().is_ok() {}

            let watcher = self.clone();
            let outcome = tokio::task::spawn_blocking(move || watcher.reload()).await;
            if let Err(e) = outcome {
                self.inner
                    .logger
                    .error("config reload task failed", &[Field::new("error", e)]);
            }
        }
    }
}

fn touches(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    match file_name {
        Some(name) => event.paths.iter().any(|p| p.file_name() == Some(name)),
        None => true,
    }
}
