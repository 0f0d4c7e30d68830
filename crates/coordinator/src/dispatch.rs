//! The dispatch queue: pending cases in FIFO order plus the in-flight set.
//!
//! Both collections live behind a single mutex so that a case is always in
//! exactly one place (pending, in flight, or handed back to the caller) and
//! two concurrent pulls can never receive the same case. Collaborator calls
//! (connector delivery) happen after the lock is released.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use caseflow_core::case::{Assignment, TestCase, Verdict};
use caseflow_core::collaborators::{CaseDelivery, Connector};
use caseflow_core::context::{ExecutionContext, CTX_ATTEMPT};
use caseflow_core::repair::RepairSource;
use caseflow_core::types::{CaseKey, ConnectionId, RunId, Timestamp};
use caseflow_core::worker::WorkerHandle;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::repair::RepairRecord;

// ---------------------------------------------------------------------------
// QueuedCase
// ---------------------------------------------------------------------------

/// A test case tracked by the queue, together with everything needed to
/// dispatch it and route its result.
#[derive(Clone)]
pub struct QueuedCase {
    pub run_id: RunId,
    pub case: TestCase,
    pub context: ExecutionContext,
    /// Run-level settings shared by every case of the run.
    pub settings: Arc<Value>,
    /// Where the result goes. The queue never inspects it beyond delivery.
    pub owner: Arc<dyn Connector>,
    /// Number of times the repair path has re-enqueued this case.
    pub attempts: u32,
    pub max_attempts: u32,
    pub registered_at: Timestamp,
    pub dispatched_to: Option<ConnectionId>,
    pub dispatched_at: Option<Timestamp>,
}

impl QueuedCase {
    pub fn new(
        run_id: RunId,
        case: TestCase,
        settings: Arc<Value>,
        owner: Arc<dyn Connector>,
        max_attempts: u32,
    ) -> Self {
        Self {
            run_id,
            case,
            context: ExecutionContext::new(),
            settings,
            owner,
            attempts: 0,
            max_attempts,
            registered_at: chrono::Utc::now(),
            dispatched_to: None,
            dispatched_at: None,
        }
    }

    pub fn key(&self) -> CaseKey {
        CaseKey::new(self.run_id, self.case.id.clone())
    }

    /// The message body handed to a worker.
    pub fn assignment(&self) -> Assignment {
        Assignment {
            run_id: self.run_id,
            case: self.case.clone(),
            context: self.context.clone(),
            settings: (*self.settings).clone(),
            attempt: self.attempts,
        }
    }

    /// Clear dispatch bookkeeping before the case goes back to pending.
    pub fn reset_dispatch(&mut self) {
        self.dispatched_to = None;
        self.dispatched_at = None;
    }
}

impl fmt::Debug for QueuedCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedCase")
            .field("run_id", &self.run_id)
            .field("case_id", &self.case.id)
            .field("owner", &self.owner.name())
            .field("attempts", &self.attempts)
            .field("dispatched_to", &self.dispatched_to)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// What happened to a result reported by a worker.
#[derive(Debug)]
pub enum Completion {
    /// The owner accepted the result.
    Delivered,
    /// The case was not in flight (already completed, repaired, or unknown).
    Stale,
    /// The owner rejected or could not receive the result. The caller must
    /// route the record through the repair path.
    Undeliverable(RepairRecord),
}

// ---------------------------------------------------------------------------
// DispatchQueue
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DispatchState {
    pending: VecDeque<QueuedCase>,
    in_flight: HashMap<CaseKey, QueuedCase>,
}

#[derive(Default)]
pub struct DispatchQueue {
    state: Mutex<DispatchState>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a case to the tail of the pending queue.
    pub async fn enqueue(&self, case: QueuedCase) {
        tracing::debug!(key = %case.key(), attempts = case.attempts, "Case enqueued");
        self.state.lock().await.pending.push_back(case);
    }

    /// Append several cases atomically, preserving their order.
    pub async fn enqueue_all(&self, cases: impl IntoIterator<Item = QueuedCase>) {
        let mut state = self.state.lock().await;
        state.pending.extend(cases);
    }

    /// Pop the oldest pending case for `worker`.
    ///
    /// The returned case already carries the worker's stamp in its context
    /// and is recorded as in flight.
    pub async fn try_dispatch(&self, worker: &WorkerHandle) -> Option<QueuedCase> {
        let mut state = self.state.lock().await;
        let mut case = state.pending.pop_front()?;

        worker.stamp(&mut case.context);
        case.context.insert(CTX_ATTEMPT, case.attempts);
        case.dispatched_to = Some(worker.connection_id.clone());
        case.dispatched_at = Some(chrono::Utc::now());

        state.in_flight.insert(case.key(), case.clone());
        Some(case)
    }

    /// Complete an in-flight case and forward its result to the owner.
    ///
    /// Context reported by the worker is merged over the dispatch context.
    /// Reports for cases that are not in flight on `conn_id` are ignored, so a
    /// worker whose case was swept and handed to another worker cannot
    /// complete the new dispatch.
    pub async fn complete(
        &self,
        conn_id: &str,
        key: &CaseKey,
        verdict: Verdict,
        output: Value,
        context: ExecutionContext,
    ) -> Completion {
        let Some(mut case) = self.take_in_flight(conn_id, key).await else {
            tracing::debug!(conn_id, %key, "Ignoring result for a case that is not in flight on this worker");
            return Completion::Stale;
        };
        case.context.merge(context);

        if !case.owner.is_alive() {
            let reason = format!("Owner of run {} is gone", case.run_id);
            return Completion::Undeliverable(RepairRecord::new(
                case,
                reason,
                RepairSource::StaleOwner,
            ));
        }

        let delivery = CaseDelivery {
            key: key.clone(),
            case: case.case.clone(),
            verdict,
            output,
            context: case.context.clone(),
            attempt: case.attempts,
        };

        match case.owner.receive_result(&delivery).await {
            Ok(()) => {
                tracing::debug!(%key, ?verdict, "Result delivered");
                Completion::Delivered
            }
            Err(e) => {
                tracing::warn!(%key, owner = case.owner.name(), error = %e, "Result delivery failed");
                Completion::Undeliverable(RepairRecord::new(
                    case,
                    e.to_string(),
                    RepairSource::DeliveryFailure,
                ))
            }
        }
    }

    /// Remove a case from the in-flight set if it is dispatched to `conn_id`.
    pub async fn take_in_flight(&self, conn_id: &str, key: &CaseKey) -> Option<QueuedCase> {
        let mut state = self.state.lock().await;
        match state.in_flight.get(key) {
            Some(case) if case.dispatched_to.as_deref() == Some(conn_id) => {
                state.in_flight.remove(key)
            }
            _ => None,
        }
    }

    /// Remove every in-flight case dispatched to `conn_id`.
    pub async fn evict_worker(&self, conn_id: &str) -> Vec<QueuedCase> {
        let mut state = self.state.lock().await;
        let keys: Vec<CaseKey> = state
            .in_flight
            .iter()
            .filter(|(_, case)| case.dispatched_to.as_deref() == Some(conn_id))
            .map(|(key, _)| key.clone())
            .collect();
        keys.iter()
            .filter_map(|key| state.in_flight.remove(key))
            .collect()
    }

    /// Remove every in-flight case dispatched longer than `timeout` ago.
    pub async fn evict_expired(&self, timeout: Duration, now: Timestamp) -> Vec<QueuedCase> {
        let mut state = self.state.lock().await;
        let keys: Vec<CaseKey> = state
            .in_flight
            .iter()
            .filter(|(_, case)| {
                case.dispatched_at
                    .map(|at| older_than(at, now, timeout))
                    .unwrap_or(false)
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.iter()
            .filter_map(|key| state.in_flight.remove(key))
            .collect()
    }

    /// `(pending, in_flight)` counts for one run.
    pub async fn counts_for_run(&self, run_id: RunId) -> (usize, usize) {
        let state = self.state.lock().await;
        let pending = state.pending.iter().filter(|c| c.run_id == run_id).count();
        let running = state.in_flight.keys().filter(|k| k.run_id == run_id).count();
        (pending, running)
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }
}

/// Whether `at` lies more than `age` before `now`. Timestamps in the future
/// are never considered old.
pub(crate) fn older_than(at: Timestamp, now: Timestamp, age: Duration) -> bool {
    (now - at).to_std().map(|elapsed| elapsed > age).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use caseflow_core::collaborators::DeliveryError;
    use caseflow_core::context::CTX_WORKER_CONNECTION_ID;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Sink {
        received: StdMutex<Vec<CaseDelivery>>,
        reject: AtomicBool,
        dead: AtomicBool,
    }

    #[async_trait]
    impl Connector for Sink {
        fn name(&self) -> &str {
            "sink"
        }

        async fn receive_result(&self, delivery: &CaseDelivery) -> Result<(), DeliveryError> {
            if self.reject.load(Ordering::SeqCst) {
                return Err(DeliveryError::Rejected {
                    name: "sink".into(),
                    message: "nope".into(),
                });
            }
            self.received.lock().unwrap().push(delivery.clone());
            Ok(())
        }

        fn is_alive(&self) -> bool {
            !self.dead.load(Ordering::SeqCst)
        }
    }

    fn queued(run_id: RunId, id: &str, owner: &Arc<Sink>) -> QueuedCase {
        QueuedCase::new(
            run_id,
            TestCase::new(id),
            Arc::new(Value::Null),
            owner.clone() as Arc<dyn Connector>,
            3,
        )
    }

    // ---- Test: FIFO order ----

    #[tokio::test]
    async fn dispatches_in_enqueue_order() {
        let queue = DispatchQueue::new();
        let sink = Arc::new(Sink::default());
        let run = uuid::Uuid::new_v4();
        queue
            .enqueue_all(["a", "b", "c"].map(|id| queued(run, id, &sink)))
            .await;

        let worker = WorkerHandle::new("w", 1);
        let mut order = Vec::new();
        while let Some(case) = queue.try_dispatch(&worker).await {
            order.push(case.case.id);
        }

        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(queue.in_flight_len().await, 3);
        assert_eq!(queue.pending_len().await, 0);
    }

    #[tokio::test]
    async fn empty_queue_dispatches_nothing() {
        let queue = DispatchQueue::new();
        assert!(queue.try_dispatch(&WorkerHandle::new("w", 1)).await.is_none());
    }

    // ---- Test: dispatch stamps the worker ----

    #[tokio::test]
    async fn dispatch_stamps_worker_into_context() {
        let queue = DispatchQueue::new();
        let sink = Arc::new(Sink::default());
        queue.enqueue(queued(uuid::Uuid::new_v4(), "a", &sink)).await;

        let worker = WorkerHandle::new("10.1.1.1", 7000);
        let case = queue.try_dispatch(&worker).await.unwrap();

        assert_eq!(
            case.context.get(CTX_WORKER_CONNECTION_ID),
            Some(&Value::from(worker.connection_id.clone()))
        );
        assert_eq!(case.context.get(CTX_ATTEMPT), Some(&Value::from(0)));
        assert_eq!(case.dispatched_to.as_deref(), Some(worker.connection_id.as_str()));
        assert_eq!(case.assignment().context, case.context);
    }

    // ---- Test: concurrent pulls never share a case ----

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dispatch_hands_out_each_case_once() {
        let queue = Arc::new(DispatchQueue::new());
        let sink = Arc::new(Sink::default());
        let run = uuid::Uuid::new_v4();
        let ids: Vec<String> = (0..50).map(|i| format!("case-{i}")).collect();
        queue
            .enqueue_all(ids.iter().map(|id| queued(run, id, &sink)))
            .await;

        let mut tasks = Vec::new();
        for n in 0..8 {
            let queue = queue.clone();
            tasks.push(tokio::spawn(async move {
                let worker = WorkerHandle::new(format!("w{n}"), n);
                let mut got = Vec::new();
                while let Some(case) = queue.try_dispatch(&worker).await {
                    got.push(case.case.id);
                    tokio::task::yield_now().await;
                }
                got
            }));
        }

        let mut all = Vec::new();
        for task in tasks {
            all.extend(task.await.unwrap());
        }
        let unique: HashSet<&String> = all.iter().collect();
        assert_eq!(all.len(), 50);
        assert_eq!(unique.len(), 50);
    }

    // ---- Test: complete ----

    #[tokio::test]
    async fn complete_merges_context_and_delivers() {
        let queue = DispatchQueue::new();
        let sink = Arc::new(Sink::default());
        let run = uuid::Uuid::new_v4();
        queue.enqueue(queued(run, "a", &sink)).await;
        let worker = WorkerHandle::new("w", 1);
        let case = queue.try_dispatch(&worker).await.unwrap();

        let mut reported = ExecutionContext::new();
        reported.insert("browser", "firefox");
        let completion = queue
            .complete(&worker.connection_id, &case.key(), Verdict::Passed, Value::from("ok"), reported)
            .await;

        assert_matches!(completion, Completion::Delivered);
        let received = sink.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].verdict, Verdict::Passed);
        assert_eq!(received[0].context.get("browser"), Some(&Value::from("firefox")));
        assert!(received[0].context.contains_key(CTX_WORKER_CONNECTION_ID));
        assert_eq!(queue.in_flight_len().await, 0);
    }

    #[tokio::test]
    async fn second_report_is_stale() {
        let queue = DispatchQueue::new();
        let sink = Arc::new(Sink::default());
        queue.enqueue(queued(uuid::Uuid::new_v4(), "a", &sink)).await;
        let worker = WorkerHandle::new("w", 1);
        let case = queue.try_dispatch(&worker).await.unwrap();
        let conn = worker.connection_id.as_str();

        let first = queue
            .complete(conn, &case.key(), Verdict::Passed, Value::Null, ExecutionContext::new())
            .await;
        let second = queue
            .complete(conn, &case.key(), Verdict::Failed, Value::Null, ExecutionContext::new())
            .await;

        assert_matches!(first, Completion::Delivered);
        assert_matches!(second, Completion::Stale);
        assert_eq!(sink.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_delivery_becomes_repair_record() {
        let queue = DispatchQueue::new();
        let sink = Arc::new(Sink::default());
        sink.reject.store(true, Ordering::SeqCst);
        queue.enqueue(queued(uuid::Uuid::new_v4(), "a", &sink)).await;
        let worker = WorkerHandle::new("w", 1);
        let case = queue.try_dispatch(&worker).await.unwrap();

        let completion = queue
            .complete(&worker.connection_id, &case.key(), Verdict::Passed, Value::Null, ExecutionContext::new())
            .await;

        assert_matches!(completion, Completion::Undeliverable(record) => {
            assert_eq!(record.source, RepairSource::DeliveryFailure);
            assert_eq!(record.case.case.id, "a");
        });
        assert_eq!(queue.in_flight_len().await, 0);
    }

    #[tokio::test]
    async fn dead_owner_skips_delivery() {
        let queue = DispatchQueue::new();
        let sink = Arc::new(Sink::default());
        queue.enqueue(queued(uuid::Uuid::new_v4(), "a", &sink)).await;
        let worker = WorkerHandle::new("w", 1);
        let case = queue.try_dispatch(&worker).await.unwrap();
        sink.dead.store(true, Ordering::SeqCst);

        let completion = queue
            .complete(&worker.connection_id, &case.key(), Verdict::Passed, Value::Null, ExecutionContext::new())
            .await;

        assert_matches!(completion, Completion::Undeliverable(record) => {
            assert_eq!(record.source, RepairSource::StaleOwner);
        });
        assert!(sink.received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn report_from_previous_worker_is_stale_after_redispatch() {
        let queue = DispatchQueue::new();
        let sink = Arc::new(Sink::default());
        queue.enqueue(queued(uuid::Uuid::new_v4(), "a", &sink)).await;
        let first = WorkerHandle::new("w1", 1);
        let second = WorkerHandle::new("w2", 2);

        let mut case = queue.try_dispatch(&first).await.unwrap();
        let expired = queue
            .evict_expired(Duration::ZERO, chrono::Utc::now() + chrono::Duration::seconds(1))
            .await;
        assert_eq!(expired.len(), 1);
        case.reset_dispatch();
        case.attempts += 1;
        queue.enqueue(case).await;
        let redispatched = queue.try_dispatch(&second).await.unwrap();

        let late = queue
            .complete(&first.connection_id, &redispatched.key(), Verdict::Failed, Value::Null, ExecutionContext::new())
            .await;
        assert_matches!(late, Completion::Stale);
        assert_eq!(queue.in_flight_len().await, 1);

        let genuine = queue
            .complete(&second.connection_id, &redispatched.key(), Verdict::Passed, Value::Null, ExecutionContext::new())
            .await;
        assert_matches!(genuine, Completion::Delivered);
        let received = sink.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].verdict, Verdict::Passed);
        assert_eq!(received[0].attempt, 1);
        assert_eq!(
            received[0].context.get(CTX_WORKER_CONNECTION_ID),
            Some(&Value::from(second.connection_id.clone()))
        );
    }

    // ---- Test: eviction ----

    #[tokio::test]
    async fn evict_worker_takes_only_its_cases() {
        let queue = DispatchQueue::new();
        let sink = Arc::new(Sink::default());
        let run = uuid::Uuid::new_v4();
        queue
            .enqueue_all(["a", "b", "c"].map(|id| queued(run, id, &sink)))
            .await;
        let w1 = WorkerHandle::new("w1", 1);
        let w2 = WorkerHandle::new("w2", 2);
        queue.try_dispatch(&w1).await.unwrap();
        queue.try_dispatch(&w2).await.unwrap();
        queue.try_dispatch(&w1).await.unwrap();

        let mut evicted: Vec<String> = queue
            .evict_worker(&w1.connection_id)
            .await
            .into_iter()
            .map(|c| c.case.id)
            .collect();
        evicted.sort();

        assert_eq!(evicted, vec!["a", "c"]);
        assert_eq!(queue.in_flight_len().await, 1);
    }

    #[tokio::test]
    async fn evict_expired_uses_dispatch_time() {
        let queue = DispatchQueue::new();
        let sink = Arc::new(Sink::default());
        queue.enqueue(queued(uuid::Uuid::new_v4(), "a", &sink)).await;
        queue.try_dispatch(&WorkerHandle::new("w", 1)).await.unwrap();

        let timeout = Duration::from_secs(60);
        let now = chrono::Utc::now();
        assert!(queue.evict_expired(timeout, now).await.is_empty());

        let later = now + chrono::Duration::seconds(120);
        assert_eq!(queue.evict_expired(timeout, later).await.len(), 1);
        assert_eq!(queue.in_flight_len().await, 0);
    }

    #[tokio::test]
    async fn counts_are_per_run() {
        let queue = DispatchQueue::new();
        let sink = Arc::new(Sink::default());
        let (r1, r2) = (uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
        queue.enqueue(queued(r1, "a", &sink)).await;
        queue.enqueue(queued(r1, "b", &sink)).await;
        queue.enqueue(queued(r2, "a", &sink)).await;
        queue.try_dispatch(&WorkerHandle::new("w", 1)).await.unwrap();

        assert_eq!(queue.counts_for_run(r1).await, (1, 1));
        assert_eq!(queue.counts_for_run(r2).await, (1, 0));
    }

    #[test]
    fn future_timestamps_are_not_old() {
        let now = chrono::Utc::now();
        let future = now + chrono::Duration::seconds(30);
        assert!(!older_than(future, now, Duration::ZERO));
        assert!(older_than(now - chrono::Duration::seconds(30), now, Duration::from_secs(10)));
    }
}
