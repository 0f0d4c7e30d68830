//! Worker-side view of the coordinator.
//!
//! The worker execution loop only talks to the coordinator through
//! [`CoordinatorLink`], so the same loop runs over WebSocket in production
//! and against an in-process coordinator in tests.

use async_trait::async_trait;

use crate::case::{Assignment, ExecutionOutcome};
use crate::context::ExecutionContext;
use crate::types::CaseKey;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The connection could not be established or was lost.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The peer sent something we did not expect.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The link was shut down.
    #[error("Link closed")]
    Closed,
}

#[async_trait]
pub trait CoordinatorLink: Send {
    /// Ask for work. `None` means nothing is pending right now.
    async fn pull(&mut self) -> Result<Option<Assignment>, LinkError>;

    /// Report a case that ran to completion.
    async fn report(&mut self, key: &CaseKey, outcome: ExecutionOutcome) -> Result<(), LinkError>;

    /// Hand a case whose execution crashed back to its owner for repair.
    async fn repair(
        &mut self,
        key: &CaseKey,
        context: ExecutionContext,
        reason: String,
    ) -> Result<(), LinkError>;

    /// Round-trip liveness probe.
    async fn heartbeat(&mut self) -> Result<(), LinkError>;
}
