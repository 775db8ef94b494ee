//! Synapse log locations.

use std::path::PathBuf;

use crate::watcher::{synapse3_log_path, synapse4_log_dir};

/// Filesystem locations of the two Synapse log generations.
#[derive(Debug, Clone)]
pub struct SynapseLogPaths {
    /// The single ever-growing Synapse 3 log file.
    pub synapse3_log_path: PathBuf,
    /// The directory holding rotated Synapse 4 systray logs.
    pub synapse4_log_dir: PathBuf,
}

impl SynapseLogPaths {
    #[must_use]
    pub fn new(synapse3_log_path: PathBuf, synapse4_log_dir: PathBuf) -> Self {
        Self {
            synapse3_log_path,
            synapse4_log_dir,
        }
    }

    /// Resolve the default locations under the local application-data
    /// directory.
    ///
    /// Returns `None` when the platform has no such directory.
    #[must_use]
    pub fn discover() -> Option<Self> {
        Some(Self {
            synapse3_log_path: synapse3_log_path()?,
            synapse4_log_dir: synapse4_log_dir()?,
        })
    }
}
