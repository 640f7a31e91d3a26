use chrono::{DateTime, Utc};

/// Lifecycle report sent by a watch loop to the manager that spawned it.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub id: String,
    /// Distinguishes successive loops for the same id after a restart.
    pub generation: u64,
    pub kind: WatchEventKind,
}

#[derive(Debug, Clone)]
pub enum WatchEventKind {
    /// State was loaded and the first tick is about to run.
    Running,
    /// A tick completed; `last_seen_id` is the activity known after it.
    Checked {
        at: DateTime<Utc>,
        last_seen_id: Option<String>,
    },
    /// A tick failed to fetch. The loop keeps going.
    Failed { error: String },
    /// The loop observed cancellation and returned.
    Exited,
}

impl WatchEvent {
    pub fn new(id: &str, generation: u64, kind: WatchEventKind) -> Self {
        Self {
            id: id.to_string(),
            generation,
            kind,
        }
    }
}
