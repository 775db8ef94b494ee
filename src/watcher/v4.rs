//! Watch process for Synapse 4 logs.
//!
//! Synapse 4 rotates its log into numbered files; the locator resolves the
//! active one at start. Change detection is interval polling: each tick
//! stats the file and skips the pass when the modification time is
//! unchanged, and the parser's novelty gate catches rewrites that touch
//! the file without adding a new device-data line.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::DeviceRegistry;
use crate::tray::DeviceUpdateListener;

use super::error::WatcherError;
use super::locator;
use super::process::{WatchProcess, WatchSettings, WatchState, WatchStateCell};
use super::synapse4::{self, Synapse4Pass};

/// Watch process for the JSON-embedded Synapse 4 log format.
pub struct Synapse4Watcher {
    worker: Worker,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

#[derive(Clone)]
struct Worker {
    log_dir: PathBuf,
    registry: DeviceRegistry,
    listener: Arc<dyn DeviceUpdateListener>,
    settings: WatchSettings,
    state: WatchStateCell,
    /// Authoritative timestamp consumed by the last merge pass; survives
    /// retry cycles within this watcher instance.
    last_parsed_timestamp: Arc<Mutex<String>>,
}

impl Synapse4Watcher {
    #[must_use]
    pub fn new(
        log_dir: PathBuf,
        registry: DeviceRegistry,
        listener: Arc<dyn DeviceUpdateListener>,
        settings: WatchSettings,
    ) -> Self {
        Self {
            worker: Worker {
                log_dir,
                registry,
                listener,
                settings,
                state: WatchStateCell::new(),
                last_parsed_timestamp: Arc::new(Mutex::new(String::new())),
            },
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Resolve the active log file, run the initial merge pass and spawn
    /// the poll loop.
    async fn attach_and_watch(
        worker: Worker,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, WatcherError> {
        let Some(log_path) = locator::latest_log_file(&worker.log_dir) else {
            return Err(WatcherError::NoLogCandidates(worker.log_dir.clone()));
        };
        tracing::info!(path = %log_path.display(), "Found Synapse 4 log file");

        worker.run_merge_pass(&log_path, &cancel).await;
        worker.state.transition(WatchState::Watching);

        Ok(tokio::spawn(async move {
            worker.poll_loop(log_path, cancel).await;
        }))
    }

    /// Retry until attach succeeds or the token is cancelled. The retry
    /// delay is the polling interval; there is no backoff and no cap.
    async fn retry_loop(worker: Worker, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(worker.settings.poll_interval) => {}
            }
            worker.state.transition(WatchState::Starting);
            match Self::attach_and_watch(worker.clone(), cancel.clone()).await {
                Ok(task) => {
                    let _ = task.await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Synapse 4 watcher start failed, retrying");
                    worker.state.transition(WatchState::RetryPending);
                }
            }
        }
    }
}

async fn file_mtime(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

impl Worker {
    /// One merge pass: read the whole file, parse, fold, notify.
    ///
    /// A pass without fresh evidence (no device-data lines, stale
    /// authoritative timestamp, unreadable authoritative payload) leaves
    /// the registry untouched and does not notify.
    async fn run_merge_pass(&self, log_path: &Path, cancel: &CancellationToken) {
        let started = std::time::Instant::now();
        let text = match tokio::fs::read_to_string(log_path).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    path = %log_path.display(),
                    error = %e,
                    "Failed to read Synapse 4 log"
                );
                return;
            }
        };

        let last_seen = self.last_parsed_timestamp.lock().clone();
        match synapse4::parse_log(&text, &last_seen) {
            Synapse4Pass::NoNewData => {}
            Synapse4Pass::Snapshot(snapshot) => {
                *self.last_parsed_timestamp.lock() = snapshot.last_timestamp.clone();
                let folded = self.registry.apply(cancel, |devices| {
                    synapse4::fold(devices, &snapshot, &self.settings.shown_device_handle);
                });
                if folded {
                    tracing::debug!(
                        timestamp = %snapshot.last_timestamp,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Parsed Synapse 4 battery changes"
                    );
                    self.listener.on_device_update(&self.registry.snapshot());
                }
            }
        }
    }

    async fn poll_loop(&self, log_path: PathBuf, cancel: CancellationToken) {
        let mut last_modified = file_mtime(&log_path).await;
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let modified = file_mtime(&log_path).await;
                    if modified.is_some() && modified == last_modified {
                        continue;
                    }
                    if let Some(mtime) = modified {
                        tracing::debug!(mtime = ?mtime, "Synapse 4 log change detected");
                    }
                    last_modified = modified;
                    self.run_merge_pass(&log_path, &cancel).await;
                }
            }
        }
    }
}

#[async_trait]
impl WatchProcess for Synapse4Watcher {
    async fn start(&mut self) {
        self.stop();
        self.cancel = CancellationToken::new();
        let cancel = self.cancel.clone();

        self.worker.state.transition(WatchState::Starting);
        match Self::attach_and_watch(self.worker.clone(), cancel.clone()).await {
            Ok(task) => self.task = Some(task),
            Err(e) => {
                tracing::warn!(error = %e, "Synapse 4 watcher start failed, retrying");
                self.worker.state.transition(WatchState::RetryPending);
                let worker = self.worker.clone();
                self.task = Some(tokio::spawn(Self::retry_loop(worker, cancel)));
            }
        }
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        self.task = None;
        self.worker.state.transition(WatchState::Stopped);
    }

    fn state(&self) -> WatchState {
        self.worker.state.get()
    }
}

impl Drop for Synapse4Watcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
