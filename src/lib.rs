//! Razer Battery Tray - battery status for Razer peripherals, reconstructed
//! from Synapse diagnostic log files.

pub mod config;
pub mod registry;
pub mod supervisor;
pub mod tray;
pub mod watcher;
