//! Log watchers for Razer Synapse diagnostic logs.
//!
//! Provides format parsers, log discovery and the watch processes that
//! fold parsed evidence into the device registry.

mod error;
mod locator;
mod process;
mod synapse3;
mod synapse4;
mod throttle;
mod v3;
mod v4;

pub use error::WatcherError;
pub use locator::{
    candidates, latest_log_file, sequence_index, synapse3_log_path, synapse4_log_dir, LogFileInfo,
};
pub use process::{WatchProcess, WatchSettings, WatchState, WatchStateCell};
pub use synapse3::{
    parse_log as parse_synapse3_log, BatteryEvent, ConnectionEvent, Synapse3Evidence,
};
pub use synapse4::{
    parse_log as parse_synapse4_log, DeviceEvidence, DeviceSnapshot, Synapse4Pass,
};
pub use throttle::Throttle;
pub use v3::Synapse3Watcher;
pub use v4::Synapse4Watcher;
