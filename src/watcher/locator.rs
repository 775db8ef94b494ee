//! Synapse 4 log file discovery.
//!
//! Synapse 4 rotates its systray log into numbered files; the candidate
//! with the highest sequence index is the active one.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use regex::Regex;

/// A candidate Synapse 4 log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileInfo {
    /// File name within the log directory.
    pub file_name: String,
    /// Last modification time.
    pub modify_time: SystemTime,
    /// Rotation sequence index; `-1` when the file name carries no index.
    pub sequence_index: i64,
}

fn file_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^systray_systrayv(?P<digits>\d+)\.log$").expect("valid file name regex")
    })
}

/// Extract the rotation sequence index from a systray log file name.
///
/// The name carries a single generation digit followed by an optional
/// rotation index; a bare generation digit means the unrotated file, which
/// sorts lowest (`-1`). `systray_systrayv21.log` yields 21,
/// `systray_systrayv2.log` yields -1.
#[must_use]
pub fn sequence_index(file_name: &str) -> Option<i64> {
    let caps = file_name_regex().captures(file_name)?;
    let digits = &caps["digits"];
    if digits.len() < 2 {
        return Some(-1);
    }
    digits.parse().ok()
}

/// List the Synapse 4 log candidates in `dir`, newest-first by sequence
/// index.
///
/// A missing or unlistable directory yields an empty list: it signals that
/// the Synapse 4 format is unavailable, not an error.
#[must_use]
pub fn candidates(dir: &Path) -> Vec<LogFileInfo> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut found: Vec<LogFileInfo> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let file_name = entry.file_name().to_str()?.to_string();
            let sequence_index = sequence_index(&file_name)?;
            let modify_time = entry.metadata().ok()?.modified().ok()?;
            Some(LogFileInfo {
                file_name,
                modify_time,
                sequence_index,
            })
        })
        .collect();

    found.sort_by(|a, b| b.sequence_index.cmp(&a.sequence_index));
    found
}

/// Resolve the active Synapse 4 log file: the candidate with the highest
/// sequence index.
#[must_use]
pub fn latest_log_file(dir: &Path) -> Option<PathBuf> {
    let candidates = candidates(dir);
    let latest = candidates.first()?;
    Some(dir.join(&latest.file_name))
}

/// Default Synapse 3 log path under the local application-data directory.
#[must_use]
pub fn synapse3_log_path() -> Option<PathBuf> {
    Some(
        dirs::data_local_dir()?
            .join("Razer")
            .join("Synapse3")
            .join("Log")
            .join("Razer Synapse 3.log"),
    )
}

/// Default Synapse 4 log directory under the local application-data
/// directory.
#[must_use]
pub fn synapse4_log_dir() -> Option<PathBuf> {
    Some(
        dirs::data_local_dir()?
            .join("Razer")
            .join("RazerAppEngine")
            .join("User Data")
            .join("Logs"),
    )
}
