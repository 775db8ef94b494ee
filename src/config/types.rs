//! Configuration types.

use serde::{Deserialize, Serialize};

/// Which Synapse log format to watch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SynapseVersion {
    /// Pick Synapse 4 when its log directory has candidates, else Synapse 3.
    #[default]
    Auto,
    V3,
    V4,
}

/// User-facing application settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppSettings {
    /// Launch with the user session. Consumed by packaging, ignored by the
    /// watcher engine.
    pub run_at_startup: bool,
    /// Polling interval in seconds. Doubles as the retry delay and as the
    /// Synapse 3 rate-limit window.
    pub polling_throttle_seconds: u64,
    /// Device handle filter; empty shows all devices.
    pub shown_device_handle: String,
    /// Log format selection.
    pub synapse_version: SynapseVersion,
}

fn default_polling_throttle_seconds() -> u64 {
    15
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            run_at_startup: false,
            polling_throttle_seconds: default_polling_throttle_seconds(),
            shown_device_handle: String::new(),
            synapse_version: SynapseVersion::default(),
        }
    }
}
