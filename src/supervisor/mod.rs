//! Watcher supervisor: format selection, restart orchestration.

mod paths;
mod watcher_supervisor;

pub use paths::*;
pub use watcher_supervisor::*;
