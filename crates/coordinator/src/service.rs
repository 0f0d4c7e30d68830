//! The coordinator service.
//!
//! [`Coordinator`] owns the dispatch queue, run tracker, repair path and
//! worker registry, and exposes two surfaces: the submitter surface (start,
//! poll, delete) used by the HTTP API, and the worker surface (pull, report,
//! repair, heartbeat) used by worker transports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use caseflow_core::case::{Assignment, CaseResult, Verdict};
use caseflow_core::collaborators::{ConfigurationStore, Connector};
use caseflow_core::context::ExecutionContext;
use caseflow_core::error::CoreError;
use caseflow_core::protocol::{WorkerMessage, WorkerRequest};
use caseflow_core::repair::RepairSource;
use caseflow_core::run::{validate_configuration, RunConfiguration, RunHandle, RunSnapshot};
use caseflow_core::types::{CaseKey, RunId};
use caseflow_core::worker::WorkerHandle;
use caseflow_events::bus::{EventBus, RunEvent, EVENT_CASE_EXHAUSTED, EVENT_CASE_REPAIRED};
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};

use crate::config::CoordinatorConfig;
use crate::connector::{ConnectorRegistry, RunOwner};
use crate::dispatch::{Completion, DispatchQueue, QueuedCase};
use crate::registry::{WorkerRegistry, WorkerSummary};
use crate::repair::{self, RepairDecision, RepairPath, RepairRecord, RepairRecordView};
use crate::tracker::{RunSpec, RunTracker};

/// Where a run's configuration comes from.
#[derive(Debug, Clone)]
pub enum RunSource {
    Inline(RunConfiguration),
    Stored(String),
}

pub struct Coordinator {
    config: CoordinatorConfig,
    queue: DispatchQueue,
    tracker: Arc<RunTracker>,
    repairs: RepairPath,
    registry: WorkerRegistry,
    store: Arc<dyn ConfigurationStore>,
    connectors: ConnectorRegistry,
    owners: RwLock<HashMap<RunId, Arc<RunOwner>>>,
    events: Arc<EventBus>,
    next_nonce: AtomicU64,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn ConfigurationStore>,
        connectors: ConnectorRegistry,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            queue: DispatchQueue::new(),
            tracker: Arc::new(RunTracker::new(events.clone())),
            repairs: RepairPath::new(),
            registry: WorkerRegistry::new(),
            store,
            connectors,
            owners: RwLock::new(HashMap::new()),
            events,
            next_nonce: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    // -----------------------------------------------------------------------
    // Submitter surface
    // -----------------------------------------------------------------------

    /// Accept a run: resolve and validate its configuration, fan its cases
    /// out onto the dispatch queue and mark it running.
    pub async fn start(&self, source: RunSource) -> Result<RunHandle, CoreError> {
        let config = match source {
            RunSource::Inline(config) => config,
            RunSource::Stored(id) => self.store.get_configuration(&id).await?,
        };
        validate_configuration(&config)?;
        let connectors = self.connectors.resolve(&config.connectors)?;

        let run_id = uuid::Uuid::now_v7();
        let max_attempts = config
            .max_repair_attempts
            .unwrap_or(self.config.max_repair_attempts);
        let input = serde_json::to_value(&config).map_err(|e| CoreError::Internal(e.to_string()))?;

        self.tracker
            .create(RunSpec {
                id: run_id,
                input,
                case_ids: config.test_cases.iter().map(|c| c.id.clone()).collect(),
                max_failures: config.max_failures.unwrap_or(self.config.max_failures),
                timeout: config
                    .timeout_secs
                    .map(std::time::Duration::from_secs)
                    .unwrap_or(self.config.run_timeout),
            })
            .await?;

        let owner = Arc::new(RunOwner::new(run_id, self.tracker.clone(), connectors));
        self.owners.write().await.insert(run_id, owner.clone());

        let total = config.test_cases.len();
        let settings = Arc::new(config.settings);
        let owner: Arc<dyn Connector> = owner;
        self.queue
            .enqueue_all(config.test_cases.into_iter().map(|case| {
                QueuedCase::new(run_id, case, settings.clone(), owner.clone(), max_attempts)
            }))
            .await;
        self.tracker.mark_running(run_id).await?;

        tracing::info!(%run_id, total, max_attempts, "Run accepted");
        Ok(RunHandle {
            id: run_id,
            poll_endpoint: format!("{}/{run_id}", self.config.poll_base_path),
        })
    }

    /// Status of one run, including the output payload once terminal.
    pub async fn poll(&self, run_id: RunId) -> Result<RunSnapshot, CoreError> {
        let snapshot = self.tracker.snapshot(run_id, true).await?;
        Ok(self.with_queue_counts(snapshot).await)
    }

    /// Status summaries of every run, oldest first.
    pub async fn poll_all(&self) -> Vec<RunSnapshot> {
        let mut snapshots = Vec::new();
        for snapshot in self.tracker.list().await {
            snapshots.push(self.with_queue_counts(snapshot).await);
        }
        snapshots
    }

    /// The configuration a run was started with.
    pub async fn run_input(&self, run_id: RunId) -> Result<Value, CoreError> {
        self.tracker.input(run_id).await
    }

    /// Remove a run's status entry. Cases already queued or in flight are left
    /// alone; their results are dropped when they arrive.
    pub async fn delete(&self, run_id: RunId) -> Result<(), CoreError> {
        self.tracker.delete(run_id).await?;
        if let Some(owner) = self.owners.write().await.remove(&run_id) {
            owner.close();
        }
        tracing::info!(%run_id, "Run deleted");
        Ok(())
    }

    pub async fn delete_all(&self) -> usize {
        let deleted = self.tracker.delete_all().await;
        let mut owners = self.owners.write().await;
        for run_id in &deleted {
            if let Some(owner) = owners.remove(run_id) {
                owner.close();
            }
        }
        tracing::info!(count = deleted.len(), "All runs deleted");
        deleted.len()
    }

    async fn with_queue_counts(&self, mut snapshot: RunSnapshot) -> RunSnapshot {
        let (pending, running) = self.queue.counts_for_run(snapshot.id).await;
        snapshot.pending = pending;
        snapshot.running = running;
        snapshot
    }

    // -----------------------------------------------------------------------
    // Worker surface
    // -----------------------------------------------------------------------

    /// Register a worker connection. The returned receiver yields every
    /// message the transport must deliver to the worker.
    pub async fn connect_worker(&self, handle: WorkerHandle) -> mpsc::UnboundedReceiver<WorkerMessage> {
        tracing::info!(
            conn_id = %handle.connection_id,
            address = %handle.address,
            port = handle.port,
            "Worker connected",
        );
        self.registry.register(handle).await
    }

    /// Drop a worker connection and send its in-flight cases to repair.
    /// Returns the number of cases affected.
    pub async fn disconnect_worker(&self, conn_id: &str) -> usize {
        let known = self.registry.remove(conn_id).await.is_some();
        let evicted = self.queue.evict_worker(conn_id).await;
        let count = evicted.len();
        if known || count > 0 {
            tracing::info!(conn_id, in_flight = count, "Worker disconnected");
        }
        for case in evicted {
            let reason = format!("Worker {conn_id} was lost");
            self.submit_repair(RepairRecord::new(case, reason, RepairSource::WorkerLost))
                .await;
        }
        count
    }

    pub async fn workers(&self) -> Vec<WorkerSummary> {
        self.registry.list().await
    }

    pub async fn worker_count(&self) -> usize {
        self.registry.connection_count().await
    }

    /// Entry point for every message a worker sends.
    pub async fn handle_request(&self, conn_id: &str, request: WorkerRequest) -> Result<(), CoreError> {
        if !self.registry.touch(conn_id).await {
            return Err(CoreError::not_found("Worker", conn_id));
        }

        match request {
            WorkerRequest::Pull => {
                self.pull(conn_id).await?;
            }
            WorkerRequest::Report {
                run_id,
                case_id,
                verdict,
                output,
                context,
            } => {
                self.report(conn_id, &CaseKey::new(run_id, case_id), verdict, output, context)
                    .await;
            }
            WorkerRequest::Repair {
                run_id,
                case_id,
                context,
                reason,
            } => {
                self.worker_repair(conn_id, &CaseKey::new(run_id, case_id), context, reason)
                    .await;
            }
            WorkerRequest::Heartbeat { nonce } => {
                if self
                    .registry
                    .push(conn_id, WorkerMessage::HeartbeatAck { nonce })
                    .await
                    .is_err()
                {
                    self.disconnect_worker(conn_id).await;
                }
            }
            WorkerRequest::HeartbeatAck { nonce } => {
                tracing::trace!(conn_id, nonce, "Heartbeat acknowledged");
            }
        }
        Ok(())
    }

    /// Hand the oldest pending case to a worker, or tell it nothing is
    /// pending. If the push fails the worker is evicted and the case goes to
    /// repair with the rest of its in-flight work.
    pub async fn pull(&self, conn_id: &str) -> Result<Option<Assignment>, CoreError> {
        let handle = self
            .registry
            .handle(conn_id)
            .await
            .ok_or_else(|| CoreError::not_found("Worker", conn_id))?;

        let Some(case) = self.queue.try_dispatch(&handle).await else {
            if self.registry.push(conn_id, WorkerMessage::Empty).await.is_err() {
                self.disconnect_worker(conn_id).await;
            }
            return Ok(None);
        };

        let assignment = case.assignment();
        tracing::debug!(
            conn_id,
            key = %case.key(),
            attempt = case.attempts,
            "Case dispatched",
        );

        let message = WorkerMessage::Dispatch {
            assignment: assignment.clone(),
        };
        if let Err(e) = self.registry.push(conn_id, message).await {
            tracing::warn!(conn_id, error = %e, "Dispatch push failed, evicting worker");
            self.disconnect_worker(conn_id).await;
            return Err(CoreError::not_found("Worker", conn_id));
        }
        Ok(Some(assignment))
    }

    /// A worker finished a case. Returns `true` if the owner accepted it.
    /// Reports for a case no longer dispatched to `conn_id` are ignored.
    pub async fn report(
        &self,
        conn_id: &str,
        key: &CaseKey,
        verdict: Verdict,
        output: Value,
        context: ExecutionContext,
    ) -> bool {
        match self.queue.complete(conn_id, key, verdict, output, context).await {
            Completion::Delivered => true,
            Completion::Stale => false,
            Completion::Undeliverable(record) => {
                self.submit_repair(record).await;
                false
            }
        }
    }

    /// A worker's automation engine crashed on a case. Returns `false` if the
    /// case was not in flight on `conn_id`.
    pub async fn worker_repair(
        &self,
        conn_id: &str,
        key: &CaseKey,
        context: ExecutionContext,
        reason: String,
    ) -> bool {
        let Some(mut case) = self.queue.take_in_flight(conn_id, key).await else {
            tracing::debug!(conn_id, %key, "Ignoring repair request for a case that is not in flight on this worker");
            return false;
        };
        case.context.merge(context);
        tracing::warn!(%key, reason = %reason, "Harness error reported by worker");
        self.submit_repair(RepairRecord::new(case, reason, RepairSource::HarnessError))
            .await;
        true
    }

    // -----------------------------------------------------------------------
    // Repair path
    // -----------------------------------------------------------------------

    /// Route a failed case: resolve it now, or park it for an operator when
    /// automatic repair is disabled.
    pub async fn submit_repair(&self, record: RepairRecord) {
        if self.config.auto_repair {
            self.resolve_repair(record).await;
        } else {
            self.repairs.park(record).await;
        }
    }

    async fn resolve_repair(&self, record: RepairRecord) {
        let source = record.source;
        match repair::decide(record) {
            RepairDecision::Requeue(case) => self.requeue(case, source).await,
            RepairDecision::Exhausted(record) => self.exhaust(record).await,
            RepairDecision::OwnerGone(record) => {
                tracing::warn!(
                    key = %record.key(),
                    source = source.as_str(),
                    "Dropping repair record, owning run is gone",
                );
            }
        }
    }

    async fn requeue(&self, case: QueuedCase, source: RepairSource) {
        tracing::info!(key = %case.key(), attempt = case.attempts, source = source.as_str(), "Case re-enqueued for repair");
        self.events.publish(
            RunEvent::new(EVENT_CASE_REPAIRED, case.run_id)
                .with_case(case.case.id.clone())
                .with_payload(json!({ "attempt": case.attempts, "source": source })),
        );
        self.queue.enqueue(case).await;
    }

    async fn exhaust(&self, record: RepairRecord) {
        let key = record.key();
        let RepairRecord { case, reason, source, .. } = record;
        tracing::warn!(%key, attempts = case.attempts, reason = %reason, "Case exhausted its repair budget");

        let result = CaseResult::exhausted(case.case.id.clone(), reason.clone(), case.attempts)
            .with_context(case.context);
        match self.tracker.fold(case.run_id, result).await {
            Ok(_) => {
                self.events.publish(
                    RunEvent::new(EVENT_CASE_EXHAUSTED, case.run_id)
                        .with_case(key.case_id.clone())
                        .with_payload(json!({ "reason": reason, "source": source, "attempts": case.attempts })),
                );
            }
            Err(e) => {
                tracing::warn!(%key, error = %e, "Could not fold exhausted case into its run");
            }
        }
    }

    /// Records parked while automatic repair is disabled.
    pub async fn list_repairs(&self) -> Vec<RepairRecordView> {
        self.repairs.list().await
    }

    /// Put a parked case back on the queue regardless of its attempt budget.
    pub async fn resubmit_repair(&self, key: &CaseKey) -> Result<(), CoreError> {
        let record = self
            .repairs
            .take(key)
            .await
            .ok_or_else(|| CoreError::not_found("RepairRecord", key))?;
        if !record.case.owner.is_alive() {
            tracing::warn!(%key, "Dropping repair record, owning run is gone");
            return Err(CoreError::RunGone(key.run_id));
        }
        let source = record.source;
        self.requeue(repair::requeued(record), source).await;
        Ok(())
    }

    /// Give up on a parked case: it is folded into its run as exhausted.
    pub async fn fail_repair(&self, key: &CaseKey) -> Result<(), CoreError> {
        let record = self
            .repairs
            .take(key)
            .await
            .ok_or_else(|| CoreError::not_found("RepairRecord", key))?;
        self.exhaust(record).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Background passes
    // -----------------------------------------------------------------------

    /// Repair every in-flight case that exceeded the running timeout.
    pub async fn sweep_running_timeouts(&self) -> usize {
        let expired = self
            .queue
            .evict_expired(self.config.running_timeout, chrono::Utc::now())
            .await;
        let count = expired.len();
        for case in expired {
            let reason = format!(
                "No result within {}s of dispatch",
                self.config.running_timeout.as_secs()
            );
            self.submit_repair(RepairRecord::new(case, reason, RepairSource::RunningTimeout))
                .await;
        }
        count
    }

    /// Fail every run past its deadline.
    pub async fn sweep_run_timeouts(&self) -> usize {
        self.tracker.expire_overdue(chrono::Utc::now()).await.len()
    }

    /// Evict workers that stopped answering, then probe the rest.
    /// Returns the number of workers declared dead.
    pub async fn check_liveness(&self) -> usize {
        let timeout = chrono::Duration::from_std(self.config.heartbeat_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let stale = self.registry.stale(chrono::Utc::now() - timeout).await;
        for conn_id in &stale {
            tracing::warn!(conn_id = %conn_id, "Worker missed heartbeats, declaring dead");
            self.disconnect_worker(conn_id).await;
        }

        let nonce = self.next_nonce.fetch_add(1, Ordering::Relaxed);
        let probed = self.registry.probe_all(nonce).await;
        tracing::debug!(probed, nonce, "Heartbeat probes sent");
        stale.len()
    }

    /// Close every worker connection. Transports see their outbound
    /// channels end and close their sockets.
    pub async fn shutdown(&self) {
        let closed = self.registry.shutdown_all().await;
        tracing::info!(workers = closed.len(), "Coordinator closed worker connections");
    }
}
