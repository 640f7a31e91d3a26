/// Supervisor for concurrently running watch loops.
///
/// The registry is owned by the manager and only touched through its methods
/// and its event pump. Loops never see it; they report [`WatchEvent`]s over a
/// channel and the pump folds those into the matching entry.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::ManagerError;
use crate::event::{WatchEvent, WatchEventKind};
use crate::watch::{self, Watch, WatchContext, WatchSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchStatus {
    /// Registered; the loop has not loaded its state yet.
    Starting,
    Running,
    /// The most recent tick failed to fetch. The loop is still alive.
    Error,
    Stopped,
}

/// Point-in-time view of one watch, as listed by the API and the status file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchSnapshot {
    pub id: String,
    pub target: String,
    pub recipients: Vec<String>,
    pub status: WatchStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Entry {
    spec: WatchSpec,
    generation: u64,
    status: WatchStatus,
    started_at: DateTime<Utc>,
    last_check: Option<DateTime<Utc>>,
    last_activity: Option<String>,
    error: Option<String>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Entry {
    fn snapshot(&self, id: &str) -> WatchSnapshot {
        WatchSnapshot {
            id: id.to_string(),
            target: self.spec.target.to_string(),
            recipients: self.spec.recipients.clone(),
            status: self.status,
            started_at: self.started_at,
            last_check: self.last_check,
            last_activity: self.last_activity.clone(),
            error: self.error.clone(),
        }
    }

    /// True while the loop may still tick. A failed fetch does not end the loop,
    /// so `error` counts as live too.
    fn is_live(&self) -> bool {
        self.status != WatchStatus::Stopped && !self.task.as_ref().is_some_and(|t| t.is_finished())
    }

    fn apply(&mut self, kind: WatchEventKind) {
        match kind {
            WatchEventKind::Running => self.status = WatchStatus::Running,
            WatchEventKind::Checked { at, last_seen_id } => {
                self.status = WatchStatus::Running;
                self.last_check = Some(at);
                self.last_activity = last_seen_id;
                self.error = None;
            }
            WatchEventKind::Failed { error } => {
                self.status = WatchStatus::Error;
                self.error = Some(error);
            }
            WatchEventKind::Exited => self.status = WatchStatus::Stopped,
        }
    }
}

type Registry = Arc<RwLock<HashMap<String, Entry>>>;

pub struct WatchManager {
    ctx: Arc<WatchContext>,
    registry: Registry,
    events: mpsc::UnboundedSender<WatchEvent>,
    generations: AtomicU64,
    shutdown: CancellationToken,
}

impl WatchManager {
    /// Creates the manager and spawns its event pump. Must be called inside a
    /// Tokio runtime.
    pub fn new(ctx: Arc<WatchContext>) -> Self {
        let registry: Registry = Arc::default();
        let (events, rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(Arc::clone(&registry), rx));
        Self {
            ctx,
            registry,
            events,
            generations: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Registers and spawns a watch for a single recipient.
    pub async fn start(&self, target: &str, recipient: &str) -> Result<String, ManagerError> {
        let spec = WatchSpec::new(target, vec![recipient.to_string()])?;
        self.start_spec(spec).await
    }

    /// Spawns a loop for `spec`. Rejected while an identical watch still has a
    /// live loop (`starting`, `running` or `error`); a watch whose loop has
    /// exited is replaced by a fresh one.
    pub async fn start_spec(&self, spec: WatchSpec) -> Result<String, ManagerError> {
        let id = spec.id();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();

        let previous = {
            let mut registry = self.registry.write().await;
            if let Some(existing) = registry.get(&id) {
                if existing.is_live() {
                    return Err(ManagerError::Conflict(id));
                }
            }
            registry.insert(
                id.clone(),
                Entry {
                    spec: spec.clone(),
                    generation,
                    status: WatchStatus::Starting,
                    started_at: Utc::now(),
                    last_check: None,
                    last_activity: None,
                    error: None,
                    cancel: cancel.clone(),
                    task: None,
                },
            )
        };

        // A replaced loop must finish its tick before the new one loads state.
        if let Some(previous) = previous {
            info!(watch = %id, "restarting watch");
            retire(previous).await;
        }

        let watch = Watch::new(spec, Arc::clone(&self.ctx)).with_generation(generation);
        let task = tokio::spawn(watch::run(watch, cancel, self.events.clone()));

        let mut registry = self.registry.write().await;
        match registry.get_mut(&id).filter(|e| e.generation == generation) {
            Some(entry) => entry.task = Some(task),
            // Stopped before the loop was spawned; its token is already cancelled.
            None => drop(task),
        }
        info!(watch = %id, "watch registered");
        Ok(id)
    }

    /// Removes the watch from the live set and waits for its loop to exit.
    pub async fn stop(&self, id: &str) -> Result<(), ManagerError> {
        let entry = self
            .registry
            .write()
            .await
            .remove(id)
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))?;
        retire(entry).await;
        info!(watch = %id, "watch stopped by request");
        Ok(())
    }

    /// Snapshots of every registered watch, ordered by id.
    pub async fn list(&self) -> Vec<WatchSnapshot> {
        let registry = self.registry.read().await;
        let mut snapshots: Vec<_> = registry.iter().map(|(id, e)| e.snapshot(id)).collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Cancels every watch and waits for all loops to return.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<_> = {
            let mut registry = self.registry.write().await;
            registry
                .iter_mut()
                .filter_map(|(id, e)| e.task.take().map(|t| (id.clone(), t)))
                .collect()
        };
        for (id, task) in tasks {
            if let Err(e) = task.await {
                warn!(watch = %id, error = %e, "watch task ended abnormally");
            }
        }
        for entry in self.registry.write().await.values_mut() {
            entry.status = WatchStatus::Stopped;
        }
    }
}

async fn retire(mut entry: Entry) {
    entry.cancel.cancel();
    if let Some(task) = entry.task.take() {
        if let Err(e) = task.await {
            warn!(error = %e, "watch task ended abnormally");
        }
    }
}

async fn pump(registry: Registry, mut rx: mpsc::UnboundedReceiver<WatchEvent>) {
    while let Some(event) = rx.recv().await {
        let mut registry = registry.write().await;
        if let Some(entry) = registry
            .get_mut(&event.id)
            .filter(|e| e.generation == event.generation)
        {
            entry.apply(event.kind);
        }
    }
}
