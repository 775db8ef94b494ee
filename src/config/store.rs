//! Shared settings store with per-field change notification.
//!
//! The watcher supervisor subscribes to settings changes and restarts the
//! active watch process when an engine-relevant field changes. Fields are
//! announced individually so subscribers can ignore the ones they do not
//! care about.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::types::{AppSettings, SynapseVersion};

/// A named settings field, announced on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    RunAtStartup,
    PollingThrottleSeconds,
    ShownDeviceHandle,
    SynapseVersion,
}

impl SettingsField {
    /// Whether a change to this field requires restarting the active
    /// watch process.
    #[must_use]
    pub fn restarts_watch_process(self) -> bool {
        matches!(
            self,
            Self::PollingThrottleSeconds | Self::ShownDeviceHandle | Self::SynapseVersion
        )
    }
}

/// Partial settings update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SettingsPatch {
    pub run_at_startup: Option<bool>,
    pub polling_throttle_seconds: Option<u64>,
    pub shown_device_handle: Option<String>,
    pub synapse_version: Option<SynapseVersion>,
}

/// Clonable shared settings store.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    inner: Arc<Mutex<AppSettings>>,
    changes: broadcast::Sender<SettingsField>,
}

impl SettingsStore {
    #[must_use]
    pub fn new(settings: AppSettings) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Mutex::new(settings)),
            changes,
        }
    }

    /// Snapshot of the current settings.
    #[must_use]
    pub fn get(&self) -> AppSettings {
        self.inner.lock().clone()
    }

    /// Subscribe to field-level change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SettingsField> {
        self.changes.subscribe()
    }

    /// Apply a partial update, announcing each field that actually
    /// changed.
    pub fn update(&self, patch: SettingsPatch) {
        let mut changed = Vec::new();
        {
            let mut settings = self.inner.lock();
            if let Some(value) = patch.run_at_startup {
                if settings.run_at_startup != value {
                    settings.run_at_startup = value;
                    changed.push(SettingsField::RunAtStartup);
                }
            }
            if let Some(value) = patch.polling_throttle_seconds {
                if settings.polling_throttle_seconds != value {
                    settings.polling_throttle_seconds = value;
                    changed.push(SettingsField::PollingThrottleSeconds);
                }
            }
            if let Some(value) = patch.shown_device_handle {
                if settings.shown_device_handle != value {
                    settings.shown_device_handle = value;
                    changed.push(SettingsField::ShownDeviceHandle);
                }
            }
            if let Some(value) = patch.synapse_version {
                if settings.synapse_version != value {
                    settings.synapse_version = value;
                    changed.push(SettingsField::SynapseVersion);
                }
            }
        }

        for field in changed {
            tracing::debug!(field = ?field, "Settings field changed");
            let _ = self.changes.send(field);
        }
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(AppSettings::default())
    }
}
