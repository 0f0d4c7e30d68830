//! Worker handles and liveness constants.
//!
//! A [`WorkerHandle`] is a value describing one worker connection. It is
//! owned by the worker registry; everything else refers to a worker only by
//! its connection id.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::context::{ExecutionContext, CTX_WORKER_ADDRESS, CTX_WORKER_CONNECTION_ID, CTX_WORKER_PORT};
use crate::types::{ConnectionId, Timestamp};

/// If a worker has not been heard from within this many seconds it is
/// considered dead and its in-flight cases go to repair.
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 90;

/// How often the coordinator probes connected workers.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHandle {
    pub connection_id: ConnectionId,
    pub address: String,
    pub port: u16,
    pub connected_at: Timestamp,
}

impl WorkerHandle {
    /// Create a handle with a freshly generated connection id.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            connection_id: uuid::Uuid::new_v4().to_string(),
            address: address.into(),
            port,
            connected_at: chrono::Utc::now(),
        }
    }

    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }

    /// Record this worker as the current owner of a dispatched case.
    pub fn stamp(&self, context: &mut ExecutionContext) {
        context.insert(CTX_WORKER_CONNECTION_ID, self.connection_id.clone());
        context.insert(CTX_WORKER_ADDRESS, self.address.clone());
        context.insert(CTX_WORKER_PORT, self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handles_get_distinct_connection_ids() {
        let a = WorkerHandle::new("10.0.0.1", 4000);
        let b = WorkerHandle::new("10.0.0.1", 4000);
        assert_ne!(a.connection_id, b.connection_id);
    }

    #[test]
    fn stamp_writes_identity_into_context() {
        let handle = WorkerHandle::new("10.0.0.7", 5123);
        let mut ctx = ExecutionContext::new();
        handle.stamp(&mut ctx);

        assert_eq!(
            ctx.get(CTX_WORKER_CONNECTION_ID),
            Some(&json!(handle.connection_id))
        );
        assert_eq!(ctx.get(CTX_WORKER_ADDRESS), Some(&json!("10.0.0.7")));
        assert_eq!(ctx.get(CTX_WORKER_PORT), Some(&json!(5123)));
    }

    #[test]
    fn from_socket_addr_splits_ip_and_port() {
        let addr: SocketAddr = "192.168.1.20:61000".parse().unwrap();
        let handle = WorkerHandle::from_socket_addr(addr);
        assert_eq!(handle.address, "192.168.1.20");
        assert_eq!(handle.port, 61000);
    }
}
