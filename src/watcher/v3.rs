//! Watch process for the Synapse 3 log.
//!
//! Synapse 3 writes a single ever-growing log file. Change detection uses
//! notify on the parent directory; because notify can fire several times
//! for one logical write, merge passes are rate-limited by a leading-edge
//! [`Throttle`] with the configured polling interval as its window.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify_debouncer_full::{
    new_debouncer,
    notify::RecursiveMode,
    DebounceEventResult,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::DeviceRegistry;
use crate::tray::DeviceUpdateListener;

use super::error::WatcherError;
use super::process::{WatchProcess, WatchSettings, WatchState, WatchStateCell};
use super::synapse3;
use super::throttle::Throttle;

/// Debounce window for raw notify events. Distinct from the polling
/// interval, which drives the coarse rate limiter.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Watch process for the line-oriented Synapse 3 log format.
pub struct Synapse3Watcher {
    worker: Worker,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Everything the watch loop needs, clonable onto its task.
#[derive(Clone)]
struct Worker {
    log_path: PathBuf,
    registry: DeviceRegistry,
    listener: Arc<dyn DeviceUpdateListener>,
    settings: WatchSettings,
    state: WatchStateCell,
}

impl Synapse3Watcher {
    #[must_use]
    pub fn new(
        log_path: PathBuf,
        registry: DeviceRegistry,
        listener: Arc<dyn DeviceUpdateListener>,
        settings: WatchSettings,
    ) -> Self {
        Self {
            worker: Worker {
                log_path,
                registry,
                listener,
                settings,
                state: WatchStateCell::new(),
            },
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Attach change detection, run the initial merge pass and spawn the
    /// watch loop.
    async fn attach_and_watch(
        worker: Worker,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, WatcherError> {
        if !worker.log_path.is_file() {
            return Err(WatcherError::LogFileMissing(worker.log_path.clone()));
        }

        let (event_tx, events) = mpsc::unbounded_channel();
        let log_path = worker.log_path.clone();
        let mut debouncer = new_debouncer(
            DEBOUNCE_WINDOW,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    if events
                        .iter()
                        .any(|event| event.paths.iter().any(|p| p == &log_path))
                    {
                        let _ = event_tx.send(());
                    }
                }
                Err(errors) => {
                    for error in errors {
                        tracing::warn!(error = %error, "Synapse 3 change detection error");
                    }
                }
            },
        )?;

        let watch_dir = worker
            .log_path
            .parent()
            .unwrap_or(&worker.log_path)
            .to_path_buf();
        debouncer.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        // The registry must reflect the current file before start() returns,
        // even if the log never changes again.
        worker.run_merge_pass(&cancel).await;
        worker.state.transition(WatchState::Watching);

        Ok(tokio::spawn(async move {
            // Owning the debouncer here keeps change detection attached for
            // exactly as long as the loop runs.
            let _debouncer = debouncer;
            worker.watch_loop(events, cancel).await;
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
                    tracing::warn!(error = %e, "Synapse 3 watcher start failed, retrying");
                    worker.state.transition(WatchState::RetryPending);
                }
            }
        }
    }
}

impl Worker {
    /// One merge pass: read the whole file, parse, fold, notify.
    ///
    /// Read failures are logged and degrade to "retry on the next change
    /// event"; the registry keeps its previous state. The listener is
    /// notified after every successful pass, visible change or not.
    async fn run_merge_pass(&self, cancel: &CancellationToken) {
        let text = match tokio::fs::read_to_string(&self.log_path).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    path = %self.log_path.display(),
                    error = %e,
                    "Failed to read Synapse 3 log"
                );
                return;
            }
        };

        let evidence = synapse3::parse_log(&text);
        let folded = self.registry.apply(cancel, |devices| {
            synapse3::fold(devices, &evidence, &self.settings.shown_device_handle);
        });
        if folded {
            self.listener.on_device_update(&self.registry.snapshot());
        }
    }

    async fn watch_loop(&self, mut events: mpsc::UnboundedReceiver<()>, cancel: CancellationToken) {
        let mut throttle = Throttle::new(self.settings.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => {
                    match event {
                        None => break,
                        Some(()) => {
                            if throttle.admit() {
                                self.run_merge_pass(&cancel).await;
                            }
                        }
                    }
                }
                _ = tokio::time::sleep_until(throttle.trailing_deadline()),
                    if throttle.has_pending() =>
                {
                    throttle.fire_trailing();
                    self.run_merge_pass(&cancel).await;
                }
            }
        }
    }
}

#[async_trait]
impl WatchProcess for Synapse3Watcher {
    async fn start(&mut self) {
        self.stop();
        self.cancel = CancellationToken::new();
        let cancel = self.cancel.clone();

        self.worker.state.transition(WatchState::Starting);
        match Self::attach_and_watch(self.worker.clone(), cancel.clone()).await {
            Ok(task) => self.task = Some(task),
            Err(e) => {
                tracing::warn!(error = %e, "Synapse 3 watcher start failed, retrying");
                self.worker.state.transition(WatchState::RetryPending);
                let worker = self.worker.clone();
                self.task = Some(tokio::spawn(Self::retry_loop(worker, cancel)));
            }
        }
    }

    fn stop(&mut self) {
        // Cancelling before the state transition is what makes stop()
        // safe against late merges: DeviceRegistry::apply re-checks the
        // token under the registry lock.
        self.cancel.cancel();
        self.task = None;
        self.worker.state.transition(WatchState::Stopped);
    }

    fn state(&self) -> WatchState {
        self.worker.state.get()
    }
}

impl Drop for Synapse3Watcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
