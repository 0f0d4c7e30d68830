//! Worker registry: the connection adapter between transports and the
//! coordinator.
//!
//! Each connected worker is a [`WorkerHandle`] plus an outbound channel the
//! transport drains. The registry owns the handle lifetime; other structures
//! keep only the connection id. Removing an entry drops its sender, which
//! closes the transport's outbound loop.

use std::collections::HashMap;

use caseflow_core::protocol::WorkerMessage;
use caseflow_core::types::{ConnectionId, Timestamp};
use caseflow_core::worker::WorkerHandle;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

/// Channel sender half for pushing messages to one worker connection.
pub type WorkerSender = mpsc::UnboundedSender<WorkerMessage>;

struct WorkerEntry {
    handle: WorkerHandle,
    sender: WorkerSender,
    last_seen: Timestamp,
}

/// Listing entry for operators.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    #[serde(flatten)]
    pub handle: WorkerHandle,
    pub last_seen: Timestamp,
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("Worker {0} is not connected")]
    NotConnected(ConnectionId),

    #[error("Worker {0} connection is closed")]
    Closed(ConnectionId),
}

pub struct WorkerRegistry {
    workers: RwLock<HashMap<ConnectionId, WorkerEntry>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a worker and return the receiver for its outbound messages.
    pub async fn register(&self, handle: WorkerHandle) -> mpsc::UnboundedReceiver<WorkerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let entry = WorkerEntry {
            last_seen: chrono::Utc::now(),
            handle: handle.clone(),
            sender: tx,
        };
        self.workers
            .write()
            .await
            .insert(handle.connection_id, entry);
        rx
    }

    /// Remove a worker. Returns its handle if it was registered.
    pub async fn remove(&self, conn_id: &str) -> Option<WorkerHandle> {
        self.workers
            .write()
            .await
            .remove(conn_id)
            .map(|entry| entry.handle)
    }

    pub async fn handle(&self, conn_id: &str) -> Option<WorkerHandle> {
        self.workers
            .read()
            .await
            .get(conn_id)
            .map(|entry| entry.handle.clone())
    }

    /// Record activity from a worker. Returns `false` for unknown workers.
    pub async fn touch(&self, conn_id: &str) -> bool {
        match self.workers.write().await.get_mut(conn_id) {
            Some(entry) => {
                entry.last_seen = chrono::Utc::now();
                true
            }
            None => false,
        }
    }

    /// Push a message to one worker.
    pub async fn push(&self, conn_id: &str, message: WorkerMessage) -> Result<(), PushError> {
        let workers = self.workers.read().await;
        let entry = workers
            .get(conn_id)
            .ok_or_else(|| PushError::NotConnected(conn_id.to_string()))?;
        entry
            .sender
            .send(message)
            .map_err(|_| PushError::Closed(conn_id.to_string()))
    }

    /// Workers not heard from since `cutoff`, or whose channel is closed.
    pub async fn stale(&self, cutoff: Timestamp) -> Vec<ConnectionId> {
        self.workers
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.last_seen < cutoff || entry.sender.is_closed())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Send a heartbeat probe to every worker. Returns the number probed.
    pub async fn probe_all(&self, nonce: u64) -> usize {
        let workers = self.workers.read().await;
        for entry in workers.values() {
            let _ = entry.sender.send(WorkerMessage::Heartbeat { nonce });
        }
        workers.len()
    }

    pub async fn list(&self) -> Vec<WorkerSummary> {
        let mut list: Vec<WorkerSummary> = self
            .workers
            .read()
            .await
            .values()
            .map(|entry| WorkerSummary {
                handle: entry.handle.clone(),
                last_seen: entry.last_seen,
            })
            .collect();
        list.sort_by_key(|w| w.handle.connected_at);
        list
    }

    pub async fn connection_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// Drop every connection. Transports observe their channels closing.
    pub async fn shutdown_all(&self) -> Vec<ConnectionId> {
        let mut workers = self.workers.write().await;
        let ids: Vec<ConnectionId> = workers.keys().cloned().collect();
        workers.clear();
        tracing::info!(count = ids.len(), "Worker registry cleared");
        ids
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
