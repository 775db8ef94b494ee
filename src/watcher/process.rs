//! Watch process interface and state machine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

/// Lifecycle state of a watch process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatchState {
    #[default]
    Stopped,
    Starting,
    Watching,
    RetryPending,
}

/// Shared state cell, readable from the owning handle while the watch loop
/// runs on its own task.
#[derive(Debug, Clone, Default)]
pub struct WatchStateCell {
    inner: Arc<Mutex<WatchState>>,
}

impl WatchStateCell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self) -> WatchState {
        *self.inner.lock()
    }

    pub fn transition(&self, new_state: WatchState) {
        let mut state = self.inner.lock();
        tracing::debug!(from = ?*state, to = ?new_state, "Watch state transition");
        *state = new_state;
    }
}

/// Settings snapshot handed to a watch process at start.
///
/// A watch process never observes live settings changes; the supervisor
/// restarts it with a fresh snapshot instead.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    /// Polling interval, also the retry delay and the rate-limit window.
    pub poll_interval: Duration,
    /// Device handle filter; empty selects all devices.
    pub shown_device_handle: String,
}

impl WatchSettings {
    #[must_use]
    pub fn new(poll_seconds: u64, shown_device_handle: String) -> Self {
        Self {
            poll_interval: Duration::from_secs(poll_seconds.max(1)),
            shown_device_handle,
        }
    }
}

/// A running log watcher for one Synapse format.
///
/// `start` never fails outward: attach errors degrade into an internal
/// retry cycle. `stop` is idempotent, synchronous and guarantees that no
/// merge from this process mutates the registry afterwards.
#[async_trait]
pub trait WatchProcess: Send {
    /// (Re)start watching. Performs one merge pass before returning when
    /// the log is available, so the registry reflects the current file
    /// state even if no change event ever fires.
    async fn start(&mut self);

    /// Stop watching, cancel any pending retry and detach change
    /// detection.
    fn stop(&mut self);

    /// Current lifecycle state.
    fn state(&self) -> WatchState;
}
