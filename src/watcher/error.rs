//! Watcher error types.

use std::path::PathBuf;

/// Errors that can occur while attaching to or reading a Synapse log.
#[derive(thiserror::Error, Debug)]
pub enum WatcherError {
    /// The Synapse 3 log file does not exist.
    #[error("Log file missing: {0}")]
    LogFileMissing(PathBuf),

    /// No Synapse 4 log file could be located in the log directory.
    #[error("No Synapse 4 log file found in {0}")]
    NoLogCandidates(PathBuf),

    /// Notify watcher error.
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
