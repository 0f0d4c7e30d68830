//! WebSocket link to the coordinator's worker endpoint.
//!
//! [`WsLink::connect`] opens the socket and splits it into two tasks:
//!
//! - a writer that serializes [`WorkerRequest`]s onto the sink;
//! - a reader that parses [`WorkerMessage`]s and answers coordinator
//!   heartbeat probes on its own, so a worker busy executing a long case
//!   still looks alive.
//!
//! Everything else the reader forwards to the link's inbox.

use async_trait::async_trait;
use caseflow_core::case::{Assignment, ExecutionOutcome};
use caseflow_core::context::ExecutionContext;
use caseflow_core::link::{CoordinatorLink, LinkError};
use caseflow_core::protocol::{parse_message, WorkerMessage, WorkerRequest};
use caseflow_core::types::CaseKey;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

pub struct WsLink {
    outbound: mpsc::UnboundedSender<WorkerRequest>,
    inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    next_nonce: u64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WsLink {
    /// Connect to the coordinator, e.g. `ws://host:3000/api/v1/workers/ws`.
    pub async fn connect(url: &str) -> Result<Self, LinkError> {
        let (ws_stream, _response) = connect_async(url).await.map_err(|e| {
            LinkError::Connection(format!("Failed to connect to coordinator at {url}: {e}"))
        })?;
        tracing::info!(url, "Connected to coordinator");

        let (mut sink, mut stream) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<WorkerRequest>();
        let (inbox_tx, inbox) = mpsc::unbounded_channel::<WorkerMessage>();

        let writer = tokio::spawn(async move {
            while let Some(request) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&request) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode worker request");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    tracing::debug!("Coordinator sink closed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let probe_replies = outbound.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::debug!(error = %e, "Coordinator receive error");
                        break;
                    }
                };
                match parse_message(&text) {
                    Ok(WorkerMessage::Heartbeat { nonce }) => {
                        if probe_replies.send(WorkerRequest::HeartbeatAck { nonce }).is_err() {
                            break;
                        }
                    }
                    Ok(message) => {
                        if inbox_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Malformed coordinator frame");
                    }
                }
            }
            tracing::info!("Coordinator connection closed");
        });

        Ok(Self {
            outbound,
            inbox,
            next_nonce: 1,
            reader,
            writer,
        })
    }

    fn send(&self, request: WorkerRequest) -> Result<(), LinkError> {
        self.outbound
            .send(request)
            .map_err(|_| LinkError::Connection("connection to coordinator lost".into()))
    }

    async fn recv(&mut self) -> Result<WorkerMessage, LinkError> {
        self.inbox
            .recv()
            .await
            .ok_or_else(|| LinkError::Connection("connection to coordinator lost".into()))
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[async_trait]
impl CoordinatorLink for WsLink {
    async fn pull(&mut self) -> Result<Option<Assignment>, LinkError> {
        self.send(WorkerRequest::Pull)?;
        loop {
            match self.recv().await? {
                WorkerMessage::Dispatch { assignment } => return Ok(Some(assignment)),
                WorkerMessage::Empty => return Ok(None),
                // Late ack of an earlier heartbeat.
                WorkerMessage::HeartbeatAck { .. } | WorkerMessage::Heartbeat { .. } => {}
            }
        }
    }

    async fn report(&mut self, key: &CaseKey, outcome: ExecutionOutcome) -> Result<(), LinkError> {
        self.send(WorkerRequest::report(key, outcome))
    }

    async fn repair(
        &mut self,
        key: &CaseKey,
        context: ExecutionContext,
        reason: String,
    ) -> Result<(), LinkError> {
        self.send(WorkerRequest::repair(key, context, reason))
    }

    async fn heartbeat(&mut self) -> Result<(), LinkError> {
        let nonce = self.next_nonce;
        self.next_nonce += 1;
        self.send(WorkerRequest::Heartbeat { nonce })?;
        loop {
            match self.recv().await? {
                WorkerMessage::HeartbeatAck { nonce: acked } if acked == nonce => return Ok(()),
                WorkerMessage::HeartbeatAck { .. } | WorkerMessage::Heartbeat { .. } => {}
                other => {
                    return Err(LinkError::Protocol(format!(
                        "Unexpected message while waiting for heartbeat ack: {other:?}"
                    )))
                }
            }
        }
    }
}
