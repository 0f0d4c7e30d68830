//! In-process [`CoordinatorLink`] for embedding workers next to the
//! coordinator (tests, single-binary setups).
//!
//! Messages go through exactly the same path a WebSocket connection uses:
//! requests enter via [`Coordinator::handle_request`] and replies are read
//! from the worker's registry channel.

use std::sync::Arc;

use async_trait::async_trait;
use caseflow_core::case::{Assignment, ExecutionOutcome};
use caseflow_core::context::ExecutionContext;
use caseflow_core::link::{CoordinatorLink, LinkError};
use caseflow_core::protocol::{WorkerMessage, WorkerRequest};
use caseflow_core::types::{CaseKey, ConnectionId};
use caseflow_core::worker::WorkerHandle;
use tokio::sync::mpsc;

use crate::service::Coordinator;

pub struct LocalLink {
    coordinator: Arc<Coordinator>,
    connection_id: ConnectionId,
    inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    next_nonce: u64,
}

impl LocalLink {
    /// Register a new worker with the coordinator.
    pub async fn connect(coordinator: Arc<Coordinator>, address: &str, port: u16) -> Self {
        let handle = WorkerHandle::new(address, port);
        let connection_id = handle.connection_id.clone();
        let inbox = coordinator.connect_worker(handle).await;
        Self {
            coordinator,
            connection_id,
            inbox,
            next_nonce: 1,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    async fn send(&self, request: WorkerRequest) -> Result<(), LinkError> {
        self.coordinator
            .handle_request(&self.connection_id, request)
            .await
            .map_err(|e| LinkError::Connection(e.to_string()))
    }

    /// Answer a coordinator probe the way a remote worker would.
    async fn answer_probe(&self, nonce: u64) -> Result<(), LinkError> {
        self.send(WorkerRequest::HeartbeatAck { nonce }).await
    }
}

#[async_trait]
impl CoordinatorLink for LocalLink {
    async fn pull(&mut self) -> Result<Option<Assignment>, LinkError> {
        self.send(WorkerRequest::Pull).await?;
        loop {
            match self.inbox.recv().await {
                Some(WorkerMessage::Dispatch { assignment }) => return Ok(Some(assignment)),
                Some(WorkerMessage::Empty) => return Ok(None),
                Some(WorkerMessage::Heartbeat { nonce }) => self.answer_probe(nonce).await?,
                Some(WorkerMessage::HeartbeatAck { .. }) => {}
                None => return Err(LinkError::Closed),
            }
        }
    }

    async fn report(&mut self, key: &CaseKey, outcome: ExecutionOutcome) -> Result<(), LinkError> {
        self.send(WorkerRequest::report(key, outcome)).await
    }

    async fn repair(
        &mut self,
        key: &CaseKey,
        context: ExecutionContext,
        reason: String,
    ) -> Result<(), LinkError> {
        self.send(WorkerRequest::repair(key, context, reason)).await
    }

    async fn heartbeat(&mut self) -> Result<(), LinkError> {
        let nonce = self.next_nonce;
        self.next_nonce += 1;
        self.send(WorkerRequest::Heartbeat { nonce }).await?;
        loop {
            match self.inbox.recv().await {
                Some(WorkerMessage::HeartbeatAck { nonce: acked }) if acked == nonce => return Ok(()),
                Some(WorkerMessage::Heartbeat { nonce }) => self.answer_probe(nonce).await?,
                Some(other) => {
                    return Err(LinkError::Protocol(format!(
                        "Unexpected message while waiting for heartbeat ack: {other:?}"
                    )))
                }
                None => return Err(LinkError::Closed),
            }
        }
    }
}
