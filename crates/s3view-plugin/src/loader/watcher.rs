//! Hot-reload watcher — polls tracked plugin files on a fixed interval.
//!
//! A file that disappeared is unloaded; a file whose modification time moved
//! forward is reloaded. Both re-check, under the loader lock, that the file
//! is still actively watched, so a tick that raced an unload is a no-op.
//!
//! Stopping the watcher only takes effect between files. A reload already
//! in progress runs under the loader's scope and finishes first.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::LoaderInner;

/// A running watcher task.
#[derive(Debug)]
pub(super) struct WatcherHandle {
    /// Stops the task.
    cancel: CancellationToken,
    /// The task.
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Whether the task is still running.
    pub(super) fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancels the task and waits for it to exit.
    pub(super) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Plugin watcher task failed");
        }
    }
}

impl LoaderInner {
    /// Starts the watcher unless one is already running. The task stops
    /// when `scope` is cancelled; reloads it starts observe `scope` only.
    pub(super) async fn start_watcher(self: &Arc<Self>, scope: &CancellationToken) {
        let mut slot = self.watcher.lock().await;
        if slot.as_ref().is_some_and(WatcherHandle::is_running) {
            return;
        }

        let cancel = scope.child_token();
        let interval = self.config.reload_interval();
        let task = tokio::spawn(run(
            Arc::downgrade(self),
            cancel.clone(),
            scope.clone(),
            interval,
        ));

        info!(interval_ms = interval.as_millis() as u64, "Plugin watcher started");
        *slot = Some(WatcherHandle { cancel, task });
    }

    /// Stops the watcher, if running, and waits for it to exit, including
    /// any reload it has in progress.
    pub(super) async fn stop_watcher(&self) {
        let handle = self.watcher.lock().await.take();
        if let Some(handle) = handle {
            handle.stop().await;
            info!("Plugin watcher stopped");
        }
    }

    /// One watcher pass over every actively watched file. `stop` is checked
    /// between files; `scope` bounds each reload.
    async fn poll_watched(&self, stop: &CancellationToken, scope: &CancellationToken) {
        for (path, known) in self.watched_files().await {
            if stop.is_cancelled() {
                return;
            }
            self.check_file(scope, &path, known).await;
        }
    }

    async fn check_file(&self, scope: &CancellationToken, path: &Path, known: SystemTime) {
        let modified = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata.modified(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.unload_if_watched(path).await;
                return;
            }
            Err(e) => Err(e),
        };

        match modified {
            Ok(modified) if modified > known => {
                debug!(path = %path.display(), "Plugin file changed");
                if let Err(e) = self.reload_if_watched(scope, path).await {
                    warn!(path = %path.display(), error = %e, "Hot reload failed");
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot stat watched plugin file");
            }
        }
    }
}

/// Watcher loop. Holds only a weak reference so a dropped loader ends it.
async fn run(
    loader: Weak<LoaderInner>,
    cancel: CancellationToken,
    scope: CancellationToken,
    interval: Duration,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(loader) = loader.upgrade() else {
                    break;
                };
                loader.poll_watched(&cancel, &scope).await;
            }
        }
    }

    debug!("Plugin watcher exited");
}
