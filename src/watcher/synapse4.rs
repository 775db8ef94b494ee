//! JSON-embedded parser for Synapse 4 logs.
//!
//! Synapse 4 periodically logs the full list of connected devices as a JSON
//! array embedded in a timestamped text line. Every pass re-reads the file,
//! collects all such lines and treats the last one as authoritative for
//! connectivity; earlier lines still contribute battery evidence so a device
//! that only appeared mid-file keeps its last known state.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::registry::{apply_selection, DeviceMap, DeviceRecord, NO_SERIAL_HANDLE};

/// One device entry in a `connectedDeviceData` payload.
///
/// All fields are defaulted so unrelated payload additions never break
/// parsing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedDeviceInfo {
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub device_container_id: Option<String>,
    #[serde(default)]
    pub has_battery: bool,
    #[serde(default)]
    pub power_status: PowerStatus,
    #[serde(default)]
    pub name: LocalizedName,
}

impl LoggedDeviceInfo {
    /// Stable handle: serial number, falling back to the container id.
    #[must_use]
    pub fn handle(&self) -> Option<&str> {
        self.serial_number
            .as_deref()
            .or(self.device_container_id.as_deref())
    }
}

/// Battery block of a device entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerStatus {
    #[serde(default)]
    pub level: i64,
    #[serde(default)]
    pub charging_status: String,
}

/// Localized display name; only the English name is used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocalizedName {
    #[serde(default)]
    pub en: String,
}

/// Battery evidence for one handle, extracted from one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvidence {
    pub handle: String,
    pub name: String,
    pub battery_percentage: u8,
    pub is_charging: bool,
}

/// The authoritative result of one Synapse 4 parse pass.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceSnapshot {
    /// Timestamp of the last (authoritative) payload line.
    pub last_timestamp: String,
    /// Battery upserts from every payload, in file order.
    pub upserts: Vec<DeviceEvidence>,
    /// Handles (serials and container ids) listed in the last payload.
    pub connected: HashSet<String>,
}

/// Outcome of a parse pass.
#[derive(Debug, PartialEq, Eq)]
pub enum Synapse4Pass {
    /// Nothing to merge: no payload lines, a stale authoritative timestamp,
    /// or an unreadable authoritative payload.
    NoNewData,
    /// Fresh evidence to fold into the registry.
    Snapshot(DeviceSnapshot),
}

fn payload_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\[(?P<timestamp>.+?)\].*connectedDeviceData: (?P<json>.+)$")
            .expect("valid payload line regex")
    })
}

/// Parse one snapshot of the log text.
///
/// `last_parsed_timestamp` is the authoritative timestamp consumed by the
/// previous pass; a file whose last payload still carries it yields
/// [`Synapse4Pass::NoNewData`] so polling never re-merges unchanged state.
#[must_use]
pub fn parse_log(text: &str, last_parsed_timestamp: &str) -> Synapse4Pass {
    let matches: Vec<(&str, &str)> = payload_line_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let timestamp = caps.name("timestamp")?.as_str();
            let json = caps.name("json")?.as_str();
            Some((timestamp, json.trim_end()))
        })
        .collect();

    let Some((last_timestamp, last_json)) = matches.last().copied() else {
        tracing::debug!("No device data lines in Synapse 4 log");
        return Synapse4Pass::NoNewData;
    };

    let last_devices: Vec<LoggedDeviceInfo> = match serde_json::from_str(last_json) {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!(error = %e, "Unreadable authoritative Synapse 4 payload");
            return Synapse4Pass::NoNewData;
        }
    };

    if last_timestamp == last_parsed_timestamp {
        tracing::debug!(
            timestamp = last_timestamp,
            "No new changes in Synapse 4 log"
        );
        return Synapse4Pass::NoNewData;
    }

    let connected: HashSet<String> = last_devices
        .iter()
        .flat_map(|device| {
            device
                .serial_number
                .iter()
                .chain(device.device_container_id.iter())
        })
        .cloned()
        .collect();

    let mut upserts = Vec::new();
    for (index, &(_, json)) in matches.iter().enumerate() {
        // The last payload is already parsed; re-parsing it would double the
        // cost of every pass on large files.
        let devices: Vec<LoggedDeviceInfo> = if index == matches.len() - 1 {
            last_devices.clone()
        } else {
            match serde_json::from_str(json) {
                Ok(devices) => devices,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed Synapse 4 payload");
                    continue;
                }
            }
        };

        for device in devices.iter().filter(|d| d.has_battery) {
            let Some(handle) = device.handle() else {
                continue;
            };
            upserts.push(DeviceEvidence {
                handle: handle.to_string(),
                name: device.name.en.clone(),
                battery_percentage: device.power_status.level.clamp(0, 100) as u8,
                is_charging: device.power_status.charging_status == "Charging",
            });
        }
    }

    Synapse4Pass::Snapshot(DeviceSnapshot {
        last_timestamp: last_timestamp.to_string(),
        upserts,
        connected,
    })
}

/// Fold a parsed snapshot into the device map.
///
/// Connectivity is recomputed for every record from the authoritative
/// payload, so a handle only stays marked connected while the latest
/// snapshot still lists it. A sentinel record left over from before serial
/// resolution is dropped once a named twin exists under a real handle.
pub fn fold(devices: &mut DeviceMap, snapshot: &DeviceSnapshot, shown_handle: &str) {
    for evidence in &snapshot.upserts {
        let record = devices
            .entry(evidence.handle.clone())
            .or_insert_with(|| DeviceRecord::new(evidence.handle.clone()));
        record.name = evidence.name.clone();
        record.battery_percentage = evidence.battery_percentage;
        record.is_charging = evidence.is_charging;
    }

    for (handle, record) in devices.iter_mut() {
        record.is_connected = snapshot.connected.contains(handle);
    }

    if let Some(sentinel) = devices.get(NO_SERIAL_HANDLE) {
        let sentinel_name = sentinel.name.clone();
        let has_resolved_twin = devices
            .iter()
            .any(|(handle, record)| handle != NO_SERIAL_HANDLE && record.name == sentinel_name);
        if has_resolved_twin {
            devices.remove(NO_SERIAL_HANDLE);
        }
    }

    apply_selection(devices, shown_handle);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_json(serial: &str, name: &str, level: i64, charging: bool) -> String {
        let status = if charging { "Charging" } else { "NoCharge_BatteryFull" };
        format!(
            r#"{{"serialNumber":"{serial}","deviceContainerId":"container-{serial}","hasBattery":true,"powerStatus":{{"level":{level},"chargingStatus":"{status}"}},"name":{{"en":"{name}"}}}}"#
        )
    }

    fn payload_line(timestamp: &str, devices: &[String]) -> String {
        format!(
            "[{timestamp}] [info] systray: connectedDeviceData: [{}]\n",
            devices.join(",")
        )
    }

    #[test]
    fn test_parse_single_snapshot() {
        let log = payload_line(
            "2024-05-12 09:13:55.123",
            &[device_json("ABC123", "Razer Viper", 57, true)],
        );
        let Synapse4Pass::Snapshot(snapshot) = parse_log(&log, "") else {
            panic!("expected snapshot");
        };

        assert_eq!(snapshot.last_timestamp, "2024-05-12 09:13:55.123");
        assert_eq!(snapshot.upserts.len(), 1);
        let evidence = &snapshot.upserts[0];
        assert_eq!(evidence.handle, "ABC123");
        assert_eq!(evidence.name, "Razer Viper");
        assert_eq!(evidence.battery_percentage, 57);
        assert!(evidence.is_charging);
        assert!(snapshot.connected.contains("ABC123"));
        assert!(snapshot.connected.contains("container-ABC123"));
    }

    #[test]
    fn test_parse_empty_log_is_no_data() {
        assert_eq!(parse_log("", ""), Synapse4Pass::NoNewData);
        assert_eq!(
            parse_log("[2024-05-12] [info] systray: heartbeat\n", ""),
            Synapse4Pass::NoNewData
        );
    }

    #[test]
    fn test_novelty_gate_blocks_stale_timestamp() {
        let log = payload_line("T1", &[device_json("ABC123", "Razer Viper", 57, false)]);
        assert_eq!(parse_log(&log, "T1"), Synapse4Pass::NoNewData);
    }

    #[test]
    fn test_novelty_gate_passes_fresh_timestamp() {
        let log = payload_line("T2", &[device_json("ABC123", "Razer Viper", 57, false)]);
        assert!(matches!(parse_log(&log, "T1"), Synapse4Pass::Snapshot(_)));
    }

    #[test]
    fn test_malformed_authoritative_payload_is_no_data() {
        let log = "[T1] [info] systray: connectedDeviceData: [{\"broken\n";
        assert_eq!(parse_log(log, ""), Synapse4Pass::NoNewData);
    }

    #[test]
    fn test_malformed_intermediate_payload_is_skipped() {
        let log = format!(
            "{}{}{}",
            payload_line("T1", &[device_json("ABC123", "Razer Viper", 40, false)]),
            "[T2] [info] systray: connectedDeviceData: [{\"broken\n",
            payload_line("T3", &[device_json("ABC123", "Razer Viper", 60, false)])
        );
        let Synapse4Pass::Snapshot(snapshot) = parse_log(&log, "") else {
            panic!("expected snapshot");
        };

        // T1 and T3 both contribute; T2 is dropped without aborting the pass.
        assert_eq!(snapshot.upserts.len(), 2);
        assert_eq!(snapshot.last_timestamp, "T3");
    }

    #[test]
    fn test_every_snapshot_upserts_connectivity_from_last() {
        let log = format!(
            "{}{}",
            payload_line(
                "T1",
                &[
                    device_json("ABC123", "Razer Viper", 57, false),
                    device_json("KB99", "Razer BlackWidow", 80, false),
                ],
            ),
            payload_line("T2", &[device_json("ABC123", "Razer Viper", 55, false)])
        );
        let Synapse4Pass::Snapshot(snapshot) = parse_log(&log, "") else {
            panic!("expected snapshot");
        };

        let mut devices = DeviceMap::new();
        fold(&mut devices, &snapshot, "");

        // Battery evidence flows from both snapshots, connectivity only
        // from the last one.
        assert_eq!(devices["ABC123"].battery_percentage, 55);
        assert!(devices["ABC123"].is_connected);
        assert_eq!(devices["KB99"].battery_percentage, 80);
        assert!(!devices["KB99"].is_connected);
    }

    #[test]
    fn test_container_id_fallback() {
        let log = r#"[T1] [info] systray: connectedDeviceData: [{"deviceContainerId":"cid-1","hasBattery":true,"powerStatus":{"level":42,"chargingStatus":"Charging"},"name":{"en":"Razer Basilisk"}}]
"#;
        let Synapse4Pass::Snapshot(snapshot) = parse_log(log, "") else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.upserts[0].handle, "cid-1");
    }

    #[test]
    fn test_devices_without_battery_are_ignored() {
        let log = r#"[T1] [info] systray: connectedDeviceData: [{"serialNumber":"DOCK1","hasBattery":false,"name":{"en":"Razer Dock"}}]
"#;
        let Synapse4Pass::Snapshot(snapshot) = parse_log(log, "") else {
            panic!("expected snapshot");
        };
        assert!(snapshot.upserts.is_empty());
        // Still listed in the last payload, so it counts as connected.
        assert!(snapshot.connected.contains("DOCK1"));
    }

    #[test]
    fn test_fold_marks_absent_records_disconnected() {
        let mut devices = DeviceMap::new();
        let mut stale = DeviceRecord::new("OLD1".to_string());
        stale.is_connected = true;
        devices.insert("OLD1".to_string(), stale);

        let log = payload_line("T1", &[device_json("ABC123", "Razer Viper", 57, false)]);
        let Synapse4Pass::Snapshot(snapshot) = parse_log(&log, "") else {
            panic!("expected snapshot");
        };
        fold(&mut devices, &snapshot, "");

        assert!(!devices["OLD1"].is_connected);
        assert!(devices["ABC123"].is_connected);
    }

    #[test]
    fn test_sentinel_dedup_removes_placeholder() {
        let mut devices = DeviceMap::new();
        let mut sentinel = DeviceRecord::new(NO_SERIAL_HANDLE.to_string());
        sentinel.name = "Razer Viper".to_string();
        devices.insert(NO_SERIAL_HANDLE.to_string(), sentinel);

        let log = payload_line("T1", &[device_json("SN99", "Razer Viper", 57, false)]);
        let Synapse4Pass::Snapshot(snapshot) = parse_log(&log, "") else {
            panic!("expected snapshot");
        };
        fold(&mut devices, &snapshot, "");

        assert!(!devices.contains_key(NO_SERIAL_HANDLE));
        assert!(devices.contains_key("SN99"));
    }

    #[test]
    fn test_sentinel_without_twin_is_kept() {
        let log = format!(
            "[T1] [info] systray: connectedDeviceData: [{{\"serialNumber\":\"{NO_SERIAL_HANDLE}\",\"hasBattery\":true,\"powerStatus\":{{\"level\":30,\"chargingStatus\":\"Charging\"}},\"name\":{{\"en\":\"Razer Naga\"}}}}]\n"
        );
        let Synapse4Pass::Snapshot(snapshot) = parse_log(&log, "") else {
            panic!("expected snapshot");
        };
        let mut devices = DeviceMap::new();
        fold(&mut devices, &snapshot, "");

        assert!(devices.contains_key(NO_SERIAL_HANDLE));
    }

    #[test]
    fn test_battery_level_clamped() {
        let log = payload_line("T1", &[device_json("ABC123", "Razer Viper", 250, false)]);
        let Synapse4Pass::Snapshot(snapshot) = parse_log(&log, "") else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.upserts[0].battery_percentage, 100);

        let log = payload_line("T2", &[device_json("ABC123", "Razer Viper", -5, false)]);
        let Synapse4Pass::Snapshot(snapshot) = parse_log(&log, "") else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.upserts[0].battery_percentage, 0);
    }

    #[test]
    fn test_fold_is_idempotent() {
        let log = payload_line("T1", &[device_json("ABC123", "Razer Viper", 57, true)]);
        let Synapse4Pass::Snapshot(snapshot) = parse_log(&log, "") else {
            panic!("expected snapshot");
        };

        let mut first = DeviceMap::new();
        fold(&mut first, &snapshot, "");
        let mut second = first.clone();
        fold(&mut second, &snapshot, "");

        assert_eq!(first, second);
    }

    #[test]
    fn test_selection_applied_at_fold_time() {
        let log = payload_line(
            "T1",
            &[
                device_json("ABC123", "Razer Viper", 57, false),
                device_json("KB99", "Razer BlackWidow", 80, false),
            ],
        );
        let Synapse4Pass::Snapshot(snapshot) = parse_log(&log, "") else {
            panic!("expected snapshot");
        };
        let mut devices = DeviceMap::new();
        fold(&mut devices, &snapshot, "KB99");

        assert!(!devices["ABC123"].is_selected);
        assert!(devices["KB99"].is_selected);
    }
}
