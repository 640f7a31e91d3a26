use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::manager::WatchSnapshot;

/// Current operational state of the daemon.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    /// No watch is registered.
    Idle,
    /// At least one watch is registered.
    Watching,
    /// Shutdown was requested; loops are finishing their current tick.
    Stopping,
}

/// Runtime status written by the daemon to `<config dir>/pollwatch/status.toml`.
/// Other tools read this file (read-only) to display what is being watched.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    /// Current operational state.
    pub state: DaemonState,
    /// Human-readable error message if the daemon hit a non-fatal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// One entry per registered watch.
    #[serde(default)]
    pub watches: Vec<WatchSnapshot>,
}

impl DaemonStatus {
    /// Constructs the initial idle status on daemon startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: DaemonState::Idle,
            error: None,
            watches: Vec::new(),
        }
    }

    /// Replaces the watch list and derives `state` from it, unless stopping.
    pub fn update(&mut self, watches: Vec<WatchSnapshot>) {
        if self.state != DaemonState::Stopping {
            self.state = if watches.is_empty() {
                DaemonState::Idle
            } else {
                DaemonState::Watching
            };
        }
        self.watches = watches;
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// A status write failure is logged and never stops the daemon.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(dir = %parent.display(), error = %e, "failed to create status directory");
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                warn!(path = %path.display(), error = %e, "failed to write status file");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize status"),
    }
}
