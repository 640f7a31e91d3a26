/// Per-watch persisted state and the shared on-disk store.
///
/// All watches share one JSON file keyed by watch id. Every write is a full
/// read-modify-write of that file, serialised through the store's mutex so two
/// loops flushing at the same time cannot drop each other's entries.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::StoreError;
use crate::poll::CacheTokens;

/// Last-known snapshot for one watch. No history is kept beyond this.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchState {
    pub last_seen_id: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Activity for which the "accepting" alert has already gone out.
    pub alerted_accepting_for_id: Option<String>,
}

impl WatchState {
    pub fn tokens(&self) -> CacheTokens {
        CacheTokens {
            etag: self.etag.clone(),
            last_modified: self.last_modified.clone(),
        }
    }

    pub fn set_tokens(&mut self, tokens: CacheTokens) {
        self.etag = tokens.etag;
        self.last_modified = tokens.last_modified;
    }
}

/// Stable identifier for a (target, recipients) pair: first 12 hex chars of SHA-256.
pub fn watch_id(target: &str, recipients: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(target.as_bytes());
    hasher.update(b"\n");
    hasher.update(recipients.join(",").as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
}

pub struct StateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored state for `key`, or the empty state if the key, the
    /// file, or a parseable file is missing. An unreadable file also yields the
    /// empty state.
    pub async fn load(&self, key: &str) -> WatchState {
        let _guard = self.lock.lock().await;
        match self.read_all().await {
            Ok(mut all) => all.remove(key).unwrap_or_default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read state file");
                WatchState::default()
            }
        }
    }

    /// Replaces the entry for `key` and rewrites the whole file atomically.
    /// Fails without writing if the existing file cannot be read, so other
    /// watches' entries are never dropped.
    pub async fn save(&self, key: &str, state: &WatchState) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(key.to_string(), state.clone());
        self.write_all(&all).await
    }

    async fn read_all(&self) -> Result<BTreeMap<String, WatchState>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "state file is corrupt; starting empty");
            BTreeMap::new()
        }))
    }

    async fn write_all(&self, all: &BTreeMap<String, WatchState>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(all)?;
        // Write-then-rename so readers never observe a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
