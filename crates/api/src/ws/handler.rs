use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use caseflow_coordinator::Coordinator;
use caseflow_core::protocol::parse_request;
use caseflow_core::worker::WorkerHandle;
use futures::{SinkExt, StreamExt};

use crate::state::AppState;

/// HTTP handler that upgrades a worker connection to WebSocket.
///
/// The peer address becomes the worker's identity. Requires the server to
/// be started with `into_make_service_with_connect_info::<SocketAddr>()`.
pub async fn worker_ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_worker_socket(socket, addr, state.coordinator))
}

/// Manage a single worker connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the worker with the coordinator.
///   2. Spawns a sender task that serializes coordinator messages onto the sink.
///   3. Parses inbound frames as worker requests on the current task.
///   4. Disconnects the worker on close, which repairs its in-flight cases.
async fn handle_worker_socket(socket: WebSocket, addr: SocketAddr, coordinator: Arc<Coordinator>) {
    let handle = WorkerHandle::from_socket_addr(addr);
    let conn_id = handle.connection_id.clone();
    let mut rx = coordinator.connect_worker(handle).await;

    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(conn_id = %sender_conn_id, error = %e, "Failed to encode worker message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "Worker sink closed");
                break;
            }
        }
        // Channel closed: the coordinator dropped this worker.
        let _ = sink.send(Message::Close(None)).await;
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let request = match parse_request(text.as_str()) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::warn!(conn_id = %conn_id, error = %e, "Malformed worker frame");
                        continue;
                    }
                };
                if let Err(e) = coordinator.handle_request(&conn_id, request).await {
                    tracing::info!(conn_id = %conn_id, error = %e, "Worker no longer registered");
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "Worker receive error");
                break;
            }
        }
    }

    let repaired = coordinator.disconnect_worker(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, repaired, "Worker socket closed");
}
