use std::time::Duration;

use thiserror::Error;

/// A tick-level fetch failure. Logged by the watch loop; the tick becomes a no-op.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Transport(e) if e.is_timeout())
    }
}

/// Delivery to a single recipient failed. Never affects other recipients.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway rejected message (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
    #[error("delivery task aborted: {0}")]
    Aborted(String),
}

/// Fatal startup error: the process (or the affected watch) does not start.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no notification channel configured")]
    MissingChannel,
    #[error("{channel} channel is missing required field `{field}`")]
    MissingField {
        channel: &'static str,
        field: &'static str,
    },
    #[error("no watches configured")]
    NoWatches,
    #[error("watch for {0} has no recipients")]
    NoRecipients(String),
    #[error("invalid target URL {target}: {reason}")]
    InvalidTarget { target: String, reason: String },
    #[error("invalid URL in `{field}`: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
    #[error("poll interval must be at least 1 second")]
    InvalidInterval,
    #[error("`{0}` must be at least 1 second")]
    InvalidTimeout(&'static str),
}

#[derive(Debug, Error, PartialEq)]
pub enum ManagerError {
    #[error("watch {0} is already running")]
    Conflict(String),
    #[error("watch {0} not found")]
    NotFound(String),
    #[error(transparent)]
    InvalidTarget(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}
