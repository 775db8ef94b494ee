//! Presentation-layer interface.
//!
//! The engine does not render anything itself; it hands every completed
//! merge to a [`DeviceUpdateListener`]. The bundled [`ConsoleTray`] prints
//! a colored one-line summary per device, which stands in for a real tray
//! icon/menu.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::registry::DeviceRecord;

/// Receives the registry snapshot after every completed merge pass.
///
/// Called for merges that produced no visible change as well, and once
/// with the initial (usually empty) snapshot at supervisor startup.
pub trait DeviceUpdateListener: Send + Sync {
    fn on_device_update(&self, devices: &[DeviceRecord]);
}

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Console renderer for device updates.
#[derive(Debug, Default)]
pub struct ConsoleTray;

impl ConsoleTray {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Format one device as a summary line fragment.
#[must_use]
pub fn format_device(device: &DeviceRecord) -> String {
    let connection = if device.is_connected { "on" } else { "off" };
    let charging = if device.is_charging { " charging" } else { "" };
    let selected = if device.is_selected { "*" } else { "" };
    format!(
        "{}{} [{}] {}%{} ({connection})",
        device.name, selected, device.handle, device.battery_percentage, charging
    )
}

impl DeviceUpdateListener for ConsoleTray {
    fn on_device_update(&self, devices: &[DeviceRecord]) {
        let ts = timestamp();
        if devices.is_empty() {
            println!(
                "{} {} no devices",
                ts.dimmed(),
                "[DEVICES]".blue().bold()
            );
        } else {
            for device in devices {
                let battery = format!("{}%", device.battery_percentage);
                let battery = if device.battery_percentage <= 15 {
                    battery.red().bold().to_string()
                } else {
                    battery.green().to_string()
                };
                println!(
                    "{} {} {} [{}] {}{}{}",
                    ts.dimmed(),
                    "[DEVICES]".blue().bold(),
                    device.name.cyan(),
                    device.handle.dimmed(),
                    battery,
                    if device.is_charging { " ⚡" } else { "" },
                    if device.is_connected {
                        String::new()
                    } else {
                        format!(" {}", "(disconnected)".dimmed())
                    },
                );
            }
        }
        let _ = io::stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, handle: &str) -> DeviceRecord {
        let mut record = DeviceRecord::new(handle.to_string());
        record.name = name.to_string();
        record.battery_percentage = 57;
        record
    }

    #[test]
    fn test_format_device_disconnected() {
        let record = device("Razer Viper", "42");
        assert_eq!(format_device(&record), "Razer Viper [42] 57% (off)");
    }

    #[test]
    fn test_format_device_connected_charging_selected() {
        let mut record = device("Razer Viper", "42");
        record.is_connected = true;
        record.is_charging = true;
        record.is_selected = true;
        assert_eq!(format_device(&record), "Razer Viper* [42] 57% charging (on)");
    }

    #[test]
    fn test_console_tray_accepts_empty_snapshot() {
        // Smoke test: must not panic on an empty registry.
        ConsoleTray::new().on_device_update(&[]);
    }
}
