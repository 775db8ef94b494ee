//! Shared device registry.
//!
//! Maps a stable device handle to the last known state of that device.
//! The registry is owned by the watcher supervisor for the process lifetime;
//! watch processes receive clones of the handle and mutate entries through
//! [`DeviceRegistry::apply`].

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Sentinel handle used by Synapse 4 logs before a device's serial number
/// has been resolved.
pub const NO_SERIAL_HANDLE: &str = "NOSERIALNUMBER";

/// Last known state of a single battery-powered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    /// Stable identifier: a numeric handle (Synapse 3) or a serial
    /// number / container id (Synapse 4).
    pub handle: String,
    /// Display name.
    pub name: String,
    /// Battery charge, 0-100.
    pub battery_percentage: u8,
    /// Whether the device is currently charging.
    pub is_charging: bool,
    /// Whether the device is currently connected.
    pub is_connected: bool,
    /// Whether the device matches the configured handle filter.
    pub is_selected: bool,
}

impl DeviceRecord {
    /// Create a fresh record for a newly observed handle.
    #[must_use]
    pub fn new(handle: String) -> Self {
        Self {
            handle,
            name: String::new(),
            battery_percentage: 0,
            is_charging: false,
            is_connected: false,
            is_selected: false,
        }
    }
}

/// Map of device handle to record, ordered by handle for deterministic
/// display upstream.
pub type DeviceMap = BTreeMap<String, DeviceRecord>;

/// Shared handle to the device registry.
///
/// Cloning is cheap; all clones view the same map.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<Mutex<DeviceMap>>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a fold over the device map under the registry lock.
    ///
    /// The fold is skipped (returning `false`) when `cancel` has already
    /// been cancelled at the time the lock is held. A watch process is
    /// stopped by cancelling its token, so a late-arriving merge from a
    /// stopped process can never mutate the registry after a replacement
    /// process has started.
    pub fn apply<F>(&self, cancel: &CancellationToken, fold: F) -> bool
    where
        F: FnOnce(&mut DeviceMap),
    {
        let mut devices = self.inner.lock();
        if cancel.is_cancelled() {
            return false;
        }
        fold(&mut devices);
        true
    }

    /// Ordered snapshot of all device records.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.inner.lock().values().cloned().collect()
    }

    /// Look up a single record by handle.
    #[must_use]
    pub fn get(&self, handle: &str) -> Option<DeviceRecord> {
        self.inner.lock().get(handle).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Recompute `is_selected` for every record from the configured filter.
///
/// An empty filter selects everything.
pub fn apply_selection(devices: &mut DeviceMap, shown_handle: &str) {
    for (handle, record) in devices.iter_mut() {
        record.is_selected = shown_handle.is_empty() || shown_handle == handle.as_str();
    }
}
