//! Line-oriented parser for Synapse 3 logs.
//!
//! The Synapse 3 log is a single ever-growing text file. Every pass re-reads
//! the whole file and extracts three independent event categories: battery
//! state, device loaded, device removed. The file is chronological, so for
//! each handle only the last occurrence of an event counts.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;

use crate::registry::{apply_selection, DeviceMap, DeviceRecord};

/// Last battery evidence for one handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatteryEvent {
    pub name: String,
    pub battery_percentage: u8,
    pub is_charging: bool,
    /// Byte offset of the match in the log text.
    pub position: usize,
}

/// Last connect/disconnect evidence for one handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub name: String,
    /// Byte offset of the match in the log text.
    pub position: usize,
}

/// Everything one parse pass extracted from the log text.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Synapse3Evidence {
    /// Last battery event per handle.
    pub battery: HashMap<String, BatteryEvent>,
    /// Last device-loaded event per handle.
    pub loaded: HashMap<String, ConnectionEvent>,
    /// Last device-removed event per handle.
    pub removed: HashMap<String, ConnectionEvent>,
}

impl Synapse3Evidence {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.battery.is_empty() && self.loaded.is_empty() && self.removed.is_empty()
    }
}

// Battery events come in two sub-formats: newer Synapse 3 builds log a
// "Battery Get By Device Handle" block with a charge word, older builds log
// an "OnBatteryLevelChanged" block with a numeric charge code.
fn battery_get_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^(?P<datetime>.+?) INFO.+?Battery Get By Device Handle[\s\S]*?Name: (?P<name>.*)[\s\S]*?Handle: (?P<handle>\d+)[\s\S]*?Battery Percentage: (?P<level>\d+)[\s\S]*?Battery State: (?P<state>.+)",
        )
        .expect("valid battery regex")
    })
}

fn battery_changed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^(?P<datetime>.+?) INFO.+?OnBatteryLevelChanged[\s\S]*?Name: (?P<name>.*)[\s\S]*?Handle: (?P<handle>\d+)[\s\S]*?Battery Level: (?P<level>\d+)[\s\S]*?Charge State: (?P<state>.+)",
        )
        .expect("valid battery regex")
    })
}

fn device_loaded_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^(?P<datetime>.+?) INFO.+?_OnDeviceLoaded[\s\S]*?Name: (?P<name>.*)[\s\S]*?Handle: (?P<handle>\d+)",
        )
        .expect("valid device-loaded regex")
    })
}

fn device_removed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^(?P<datetime>.+?) INFO.+?_OnDeviceRemoved[\s\S]*?Name: (?P<name>.*)[\s\S]*?Handle: (?P<handle>\d+)",
        )
        .expect("valid device-removed regex")
    })
}

/// Interpret a captured charge-state field.
///
/// Older builds log a numeric code (nonzero means charging), newer builds
/// log a word.
fn charge_state_is_charging(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed
        .parse::<i64>()
        .map_or(trimmed == "Charging", |code| code != 0)
}

fn clamp_level(raw: &str) -> u8 {
    raw.parse::<i64>().unwrap_or(0).clamp(0, 100) as u8
}

/// Extract all evidence from one snapshot of the log text.
#[must_use]
pub fn parse_log(text: &str) -> Synapse3Evidence {
    let mut evidence = Synapse3Evidence::default();

    for regex in [battery_get_regex(), battery_changed_regex()] {
        for caps in regex.captures_iter(text) {
            let position = caps.get(0).map_or(0, |m| m.start());
            let handle = caps["handle"].to_string();
            let event = BatteryEvent {
                name: caps["name"].trim().to_string(),
                battery_percentage: clamp_level(caps["level"].trim()),
                is_charging: charge_state_is_charging(&caps["state"]),
                position,
            };
            // Later byte position wins across both sub-formats.
            let newer = evidence
                .battery
                .get(&handle)
                .map_or(true, |prev| position >= prev.position);
            if newer {
                evidence.battery.insert(handle, event);
            }
        }
    }

    for (regex, events) in [
        (device_loaded_regex(), &mut evidence.loaded),
        (device_removed_regex(), &mut evidence.removed),
    ] {
        for caps in regex.captures_iter(text) {
            let position = caps.get(0).map_or(0, |m| m.start());
            events.insert(
                caps["handle"].to_string(),
                ConnectionEvent {
                    name: caps["name"].trim().to_string(),
                    position,
                },
            );
        }
    }

    evidence
}

/// Fold parsed evidence into the device map.
///
/// Battery evidence overwrites `name`, `battery_percentage` and
/// `is_charging` for its handle and nothing else. Connectivity is derived
/// from the relative byte positions of the last loaded and removed events;
/// handles with neither event keep their previous connection state.
pub fn fold(devices: &mut DeviceMap, evidence: &Synapse3Evidence, shown_handle: &str) {
    for (handle, event) in &evidence.battery {
        let record = devices
            .entry(handle.clone())
            .or_insert_with(|| DeviceRecord::new(handle.clone()));
        record.name = event.name.clone();
        record.battery_percentage = event.battery_percentage;
        record.is_charging = event.is_charging;
    }

    let connection_handles: BTreeSet<&String> = evidence
        .loaded
        .keys()
        .chain(evidence.removed.keys())
        .collect();
    for handle in connection_handles {
        let loaded_position = evidence
            .loaded
            .get(handle)
            .map_or(-1, |e| e.position as i64);
        let removed_position = evidence
            .removed
            .get(handle)
            .map_or(-1, |e| e.position as i64);

        let record = devices
            .entry(handle.clone())
            .or_insert_with(|| DeviceRecord::new(handle.clone()));
        if record.name.is_empty() {
            if let Some(event) = evidence.loaded.get(handle).or_else(|| evidence.removed.get(handle))
            {
                record.name = event.name.clone();
            }
        }
        record.is_connected = loaded_position > removed_position;
    }

    apply_selection(devices, shown_handle);
}
