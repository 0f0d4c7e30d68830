//! Run-status tracker: one entry per run, folded from per-case results.
//!
//! The run table is a `RwLock<HashMap<..>>` of individually locked entries,
//! so folding results for one run never waits on another run. Status only
//! moves forward (`pending -> running -> complete | failed`) and terminal
//! runs keep their status forever; late results are still recorded in the
//! output payload.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use caseflow_core::case::{CaseOutcome, CaseResult, Verdict};
use caseflow_core::context::ExecutionContext;
use caseflow_core::error::CoreError;
use caseflow_core::run::{RunSnapshot, RunStatus};
use caseflow_core::types::{CaseId, CaseKey, RunId, Timestamp};
use caseflow_events::bus::{
    EventBus, RunEvent, EVENT_RUN_COMPLETED, EVENT_RUN_FAILED, EVENT_RUN_STARTED,
};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};

/// A result reported by a worker and accepted by the run owner.
#[derive(Debug, Clone, Serialize)]
pub struct CaseRecord {
    pub verdict: Verdict,
    pub output: Value,
    pub context: ExecutionContext,
    pub folded_at: Timestamp,
}

/// A case that ran out of repair attempts.
#[derive(Debug, Clone, Serialize)]
pub struct ExhaustedRecord {
    pub case_id: CaseId,
    pub reason: String,
    pub attempts: u32,
    pub context: ExecutionContext,
    pub folded_at: Timestamp,
}

/// Result of folding one case into a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    /// The result was recorded; carries the run status afterwards.
    Folded(RunStatus),
    /// A result for this case was already folded; nothing changed.
    Duplicate(RunStatus),
}

/// Per-run parameters fixed at creation.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub id: RunId,
    pub input: Value,
    pub case_ids: Vec<CaseId>,
    pub max_failures: u32,
    pub timeout: Duration,
}

struct RunEntry {
    id: RunId,
    status: RunStatus,
    progress: f64,
    input: Value,
    output: Option<Value>,
    case_ids: HashSet<CaseId>,
    results: IndexMap<CaseId, CaseRecord>,
    exhausted: IndexMap<CaseId, ExhaustedRecord>,
    max_failures: u32,
    reason: Option<String>,
    deadline: Timestamp,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl RunEntry {
    fn new(spec: RunSpec) -> Self {
        let now = chrono::Utc::now();
        let timeout = chrono::Duration::from_std(spec.timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        Self {
            id: spec.id,
            status: RunStatus::Pending,
            progress: 0.0,
            input: spec.input,
            output: None,
            case_ids: spec.case_ids.into_iter().collect(),
            results: IndexMap::new(),
            exhausted: IndexMap::new(),
            max_failures: spec.max_failures,
            reason: None,
            deadline: now + timeout,
            created_at: now,
            updated_at: now,
        }
    }

    fn total(&self) -> usize {
        self.case_ids.len()
    }

    fn completed(&self) -> usize {
        self.results.len() + self.exhausted.len()
    }

    fn failed(&self) -> usize {
        self.exhausted.len()
            + self
                .results
                .values()
                .filter(|r| r.verdict == Verdict::Failed)
                .count()
    }

    fn is_folded(&self, case_id: &str) -> bool {
        self.results.contains_key(case_id) || self.exhausted.contains_key(case_id)
    }

    /// Apply a forward transition. Returns `false` (and changes nothing) for
    /// any transition the status machine does not allow.
    fn transition(&mut self, next: RunStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = chrono::Utc::now();
        true
    }

    fn render_output(&self) -> Value {
        let count = |verdict: Verdict| self.results.values().filter(|r| r.verdict == verdict).count();
        json!({
            "summary": {
                "total": self.total(),
                "passed": count(Verdict::Passed),
                "failed": count(Verdict::Failed),
                "skipped": count(Verdict::Skipped),
                "exhausted": self.exhausted.len(),
            },
            "results": self.results,
            "failures": self.exhausted.values().collect::<Vec<_>>(),
            "reason": self.reason,
        })
    }

    fn snapshot(&self, with_output: bool) -> RunSnapshot {
        RunSnapshot {
            id: self.id,
            status: self.status,
            status_code: self.status.status_code(),
            progress: self.progress,
            total: self.total(),
            completed: self.completed(),
            running: 0,
            pending: 0,
            failed: self.failed(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            output: if with_output { self.output.clone() } else { None },
        }
    }
}

// ---------------------------------------------------------------------------
// RunTracker
// ---------------------------------------------------------------------------

pub struct RunTracker {
    runs: RwLock<HashMap<RunId, Arc<Mutex<RunEntry>>>>,
    events: Arc<EventBus>,
}

impl RunTracker {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Register a new run in `Pending`.
    pub async fn create(&self, spec: RunSpec) -> Result<(), CoreError> {
        let id = spec.id;
        let mut runs = self.runs.write().await;
        if runs.contains_key(&id) {
            return Err(CoreError::Conflict(format!("Run {id} already exists")));
        }
        runs.insert(id, Arc::new(Mutex::new(RunEntry::new(spec))));
        Ok(())
    }

    /// Move a run from `Pending` to `Running`. Returns `false` if the run had
    /// already moved on.
    pub async fn mark_running(&self, run_id: RunId) -> Result<bool, CoreError> {
        let entry = self.entry(run_id).await?;
        let mut entry = entry.lock().await;
        Ok(self.start(&mut entry))
    }

    /// Fold one case result into its run.
    ///
    /// Idempotent per case: a second result for an already folded case is
    /// reported as [`FoldOutcome::Duplicate`] and ignored.
    pub async fn fold(&self, run_id: RunId, result: CaseResult) -> Result<FoldOutcome, CoreError> {
        let entry = self.entry(run_id).await?;
        let mut entry = entry.lock().await;

        if !entry.case_ids.contains(&result.case_id) {
            return Err(CoreError::not_found(
                "Case",
                CaseKey::new(run_id, result.case_id),
            ));
        }
        if entry.is_folded(&result.case_id) {
            tracing::debug!(%run_id, case_id = %result.case_id, "Duplicate result ignored");
            return Ok(FoldOutcome::Duplicate(entry.status));
        }

        let now = chrono::Utc::now();
        let CaseResult {
            case_id,
            outcome,
            context,
        } = result;
        match outcome {
            CaseOutcome::Reported { verdict, output } => {
                entry.results.insert(
                    case_id,
                    CaseRecord {
                        verdict,
                        output,
                        context,
                        folded_at: now,
                    },
                );
            }
            CaseOutcome::Exhausted { reason, attempts } => {
                entry.exhausted.insert(
                    case_id.clone(),
                    ExhaustedRecord {
                        case_id,
                        reason,
                        attempts,
                        context,
                        folded_at: now,
                    },
                );
            }
        }
        entry.updated_at = now;
        entry.progress = entry.progress.max(entry.completed() as f64 / entry.total() as f64);

        if entry.status.is_terminal() {
            tracing::info!(%run_id, status = entry.status.as_str(), "Late result recorded for finished run");
            entry.output = Some(entry.render_output());
            return Ok(FoldOutcome::Folded(entry.status));
        }

        self.start(&mut entry);

        let exhausted = entry.exhausted.len();
        if exhausted > entry.max_failures as usize {
            let reason = format!(
                "{exhausted} case(s) exhausted their repair budget (max_failures = {})",
                entry.max_failures
            );
            self.finish(&mut entry, RunStatus::Failed, Some(reason));
        } else if entry.completed() == entry.total() {
            self.finish(&mut entry, RunStatus::Complete, None);
        }

        Ok(FoldOutcome::Folded(entry.status))
    }

    /// Fail a non-terminal run with a reason. Returns `false` if the run was
    /// already terminal.
    pub async fn fail(&self, run_id: RunId, reason: impl Into<String>) -> Result<bool, CoreError> {
        let entry = self.entry(run_id).await?;
        let mut entry = entry.lock().await;
        if entry.status.is_terminal() {
            return Ok(false);
        }
        self.start(&mut entry);
        Ok(self.finish(&mut entry, RunStatus::Failed, Some(reason.into())))
    }

    /// Fail every non-terminal run whose deadline is before `now`.
    pub async fn expire_overdue(&self, now: Timestamp) -> Vec<RunId> {
        let entries: Vec<Arc<Mutex<RunEntry>>> = self.runs.read().await.values().cloned().collect();

        let mut expired = Vec::new();
        for entry in entries {
            let mut entry = entry.lock().await;
            if entry.status.is_terminal() || entry.deadline > now {
                continue;
            }
            self.start(&mut entry);
            let reason = format!("Run timed out at {}", entry.deadline.to_rfc3339());
            if self.finish(&mut entry, RunStatus::Failed, Some(reason)) {
                expired.push(entry.id);
            }
        }
        expired
    }

    /// Snapshot of one run. The output payload is included only when
    /// `with_output` is set and the run is terminal.
    pub async fn snapshot(&self, run_id: RunId, with_output: bool) -> Result<RunSnapshot, CoreError> {
        let entry = self.entry(run_id).await?;
        let entry = entry.lock().await;
        Ok(entry.snapshot(with_output))
    }

    /// The submitted configuration of a run.
    pub async fn input(&self, run_id: RunId) -> Result<Value, CoreError> {
        let entry = self.entry(run_id).await?;
        let entry = entry.lock().await;
        Ok(entry.input.clone())
    }

    /// Snapshots of every run, oldest first, without output payloads.
    pub async fn list(&self) -> Vec<RunSnapshot> {
        let entries: Vec<Arc<Mutex<RunEntry>>> = self.runs.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            snapshots.push(entry.lock().await.snapshot(false));
        }
        snapshots.sort_by_key(|s| s.created_at);
        snapshots
    }

    pub async fn contains(&self, run_id: RunId) -> bool {
        self.runs.read().await.contains_key(&run_id)
    }

    pub async fn delete(&self, run_id: RunId) -> Result<(), CoreError> {
        self.runs
            .write()
            .await
            .remove(&run_id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("Run", run_id))
    }

    /// Remove every run. Returns the ids that were removed.
    pub async fn delete_all(&self) -> Vec<RunId> {
        self.runs.write().await.drain().map(|(id, _)| id).collect()
    }

    async fn entry(&self, run_id: RunId) -> Result<Arc<Mutex<RunEntry>>, CoreError> {
        self.runs
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("Run", run_id))
    }

    fn start(&self, entry: &mut RunEntry) -> bool {
        if !entry.transition(RunStatus::Running) {
            return false;
        }
        tracing::info!(run_id = %entry.id, total = entry.total(), "Run started");
        self.events.publish(
            RunEvent::new(EVENT_RUN_STARTED, entry.id).with_payload(json!({ "total": entry.total() })),
        );
        true
    }

    fn finish(&self, entry: &mut RunEntry, status: RunStatus, reason: Option<String>) -> bool {
        if !entry.transition(status) {
            return false;
        }
        entry.reason = reason;
        let output = entry.render_output();
        entry.output = Some(output.clone());

        let event_type = if status == RunStatus::Failed {
            tracing::warn!(run_id = %entry.id, reason = ?entry.reason, "Run failed");
            EVENT_RUN_FAILED
        } else {
            tracing::info!(run_id = %entry.id, "Run complete");
            EVENT_RUN_COMPLETED
        };
        self.events
            .publish(RunEvent::new(event_type, entry.id).with_payload(output));
        true
    }
}
