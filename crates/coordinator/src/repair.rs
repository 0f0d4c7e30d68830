//! The repair path: cases whose execution or delivery failed.
//!
//! Every failure becomes a [`RepairRecord`]. [`decide`] applies the
//! attempt budget: a case under budget is re-enqueued with its counter
//! incremented, a case at budget is exhausted, and a case whose owner is gone
//! is dropped. When automatic repair is disabled, records are parked in
//! [`RepairPath`] until an operator resubmits or fails them.

use std::collections::HashMap;

use caseflow_core::context::{ExecutionContext, CTX_LAST_FAILURE};
use caseflow_core::repair::RepairSource;
use caseflow_core::types::{CaseId, CaseKey, ConnectionId, RunId, Timestamp};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::dispatch::QueuedCase;

#[derive(Debug, Clone)]
pub struct RepairRecord {
    pub case: QueuedCase,
    pub reason: String,
    pub source: RepairSource,
    pub captured_at: Timestamp,
}

impl RepairRecord {
    pub fn new(case: QueuedCase, reason: impl Into<String>, source: RepairSource) -> Self {
        Self {
            case,
            reason: reason.into(),
            source,
            captured_at: chrono::Utc::now(),
        }
    }

    pub fn key(&self) -> CaseKey {
        self.case.key()
    }

    pub fn view(&self) -> RepairRecordView {
        RepairRecordView {
            run_id: self.case.run_id,
            case_id: self.case.case.id.clone(),
            attempts: self.case.attempts,
            max_attempts: self.case.max_attempts,
            reason: self.reason.clone(),
            source: self.source,
            last_worker: self.case.dispatched_to.clone(),
            context: self.case.context.clone(),
            captured_at: self.captured_at,
        }
    }
}

/// Serializable view of a parked record for operators.
#[derive(Debug, Clone, Serialize)]
pub struct RepairRecordView {
    pub run_id: RunId,
    pub case_id: CaseId,
    pub attempts: u32,
    pub max_attempts: u32,
    pub reason: String,
    pub source: RepairSource,
    pub last_worker: Option<ConnectionId>,
    pub context: ExecutionContext,
    pub captured_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum RepairDecision {
    /// Put the case back on the pending queue.
    Requeue(QueuedCase),
    /// The attempt budget is spent; fold an exhausted result into the run.
    Exhausted(RepairRecord),
    /// Nobody can receive the result any more.
    OwnerGone(RepairRecord),
}

/// Apply the attempt budget to a record.
pub fn decide(record: RepairRecord) -> RepairDecision {
    if !record.case.owner.is_alive() {
        return RepairDecision::OwnerGone(record);
    }
    if record.case.attempts >= record.case.max_attempts {
        return RepairDecision::Exhausted(record);
    }
    RepairDecision::Requeue(requeued(record))
}

/// The record's case, ready for another dispatch. Used both for automatic
/// repair and for operator resubmission.
pub fn requeued(record: RepairRecord) -> QueuedCase {
    let RepairRecord { mut case, reason, .. } = record;
    case.attempts += 1;
    case.context.insert(CTX_LAST_FAILURE, reason);
    case.reset_dispatch();
    case
}

// ---------------------------------------------------------------------------
// Parking lot
// ---------------------------------------------------------------------------

/// Records waiting for an operator decision.
#[derive(Default)]
pub struct RepairPath {
    parked: Mutex<HashMap<CaseKey, RepairRecord>>,
}

impl RepairPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn park(&self, record: RepairRecord) {
        tracing::info!(
            key = %record.key(),
            source = record.source.as_str(),
            reason = %record.reason,
            "Repair record parked for operator review",
        );
        self.parked.lock().await.insert(record.key(), record);
    }

    pub async fn take(&self, key: &CaseKey) -> Option<RepairRecord> {
        self.parked.lock().await.remove(key)
    }

    /// Parked records, oldest first.
    pub async fn list(&self) -> Vec<RepairRecordView> {
        let mut views: Vec<RepairRecordView> =
            self.parked.lock().await.values().map(RepairRecord::view).collect();
        views.sort_by_key(|v| v.captured_at);
        views
    }

    pub async fn len(&self) -> usize {
        self.parked.lock().await.len()
    }
}
