//! Worker wire protocol.
//!
//! Messages travel as JSON text frames of the shape
//! `{"type": "<kind>", ...fields}`. [`WorkerRequest`] flows from worker to
//! coordinator, [`WorkerMessage`] from coordinator to worker. Neither side
//! depends on the transport; the API server carries them over WebSocket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::case::{Assignment, ExecutionOutcome, Verdict};
use crate::context::ExecutionContext;
use crate::types::{CaseId, CaseKey, RunId};

/// Worker -> coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Ask for the next pending case.
    Pull,

    /// A case ran to completion (passed or failed).
    Report {
        run_id: RunId,
        case_id: CaseId,
        verdict: Verdict,
        #[serde(default)]
        output: Value,
        #[serde(default)]
        context: ExecutionContext,
    },

    /// The automation engine crashed; there is no trustworthy result.
    Repair {
        run_id: RunId,
        case_id: CaseId,
        #[serde(default)]
        context: ExecutionContext,
        reason: String,
    },

    Heartbeat { nonce: u64 },

    HeartbeatAck { nonce: u64 },
}

impl WorkerRequest {
    pub fn report(key: &CaseKey, outcome: ExecutionOutcome) -> Self {
        WorkerRequest::Report {
            run_id: key.run_id,
            case_id: key.case_id.clone(),
            verdict: outcome.verdict,
            output: outcome.output,
            context: outcome.context,
        }
    }

    pub fn repair(key: &CaseKey, context: ExecutionContext, reason: impl Into<String>) -> Self {
        WorkerRequest::Repair {
            run_id: key.run_id,
            case_id: key.case_id.clone(),
            context,
            reason: reason.into(),
        }
    }
}

/// Coordinator -> worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// A case assigned to this worker.
    Dispatch { assignment: Assignment },

    /// Nothing pending; the worker should back off and pull again.
    Empty,

    Heartbeat { nonce: u64 },

    HeartbeatAck { nonce: u64 },
}

/// Parse a text frame sent by a worker.
///
/// Returns `Err` for malformed JSON or unknown `type` values; callers log
/// and continue.
pub fn parse_request(text: &str) -> Result<WorkerRequest, serde_json::Error> {
    serde_json::from_str(text)
}

/// Parse a text frame sent by the coordinator.
pub fn parse_message(text: &str) -> Result<WorkerMessage, serde_json::Error> {
    serde_json::from_str(text)
}
