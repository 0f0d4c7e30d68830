//! Worker loop and pool behaviour against an in-process coordinator.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use caseflow_coordinator::local::LocalLink;
use caseflow_coordinator::{
    ConnectorRegistry, Coordinator, CoordinatorConfig, InMemoryConfigurationStore, RunSource,
};
use caseflow_core::case::{Assignment, ExecutionOutcome, TestCase, Verdict};
use caseflow_core::collaborators::{AutomationExecutor, HarnessError};
use caseflow_core::context::ExecutionContext;
use caseflow_core::link::{CoordinatorLink, LinkError};
use caseflow_core::run::{RunConfiguration, RunStatus};
use caseflow_core::types::{CaseKey, RunId};
use caseflow_events::EventBus;
use caseflow_worker::backoff::BackoffConfig;
use caseflow_worker::execution::WorkerLoop;
use caseflow_worker::pool::{connect_with_backoff, LinkConnector, WorkerPool};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn coordinator() -> Arc<Coordinator> {
    Arc::new(Coordinator::new(
        CoordinatorConfig::default(),
        Arc::new(InMemoryConfigurationStore::new()),
        ConnectorRegistry::new(),
        Arc::new(EventBus::default()),
    ))
}

async fn start(coordinator: &Coordinator, ids: &[&str]) -> RunId {
    let config = RunConfiguration::new(ids.iter().map(|id| TestCase::new(*id)).collect());
    coordinator
        .start(RunSource::Inline(config))
        .await
        .unwrap()
        .id
}

async fn wait_for_status(coordinator: &Coordinator, run_id: RunId, status: RunStatus) {
    for _ in 0..200 {
        if coordinator.poll(run_id).await.unwrap().status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} never reached {status:?}");
}

fn fast_backoff() -> BackoffConfig {
    BackoffConfig {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
    }
}

/// Executor with per-case scripted outcomes; unscripted cases pass.
#[derive(Default)]
struct ScriptedExecutor {
    script: Mutex<HashMap<String, VecDeque<Result<ExecutionOutcome, HarnessError>>>>,
    calls: Mutex<Vec<(String, u32)>>,
}

impl ScriptedExecutor {
    fn then(self, case_id: &str, result: Result<ExecutionOutcome, HarnessError>) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(case_id.to_string())
            .or_default()
            .push_back(result);
        self
    }

    fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AutomationExecutor for ScriptedExecutor {
    async fn execute(&self, assignment: &Assignment) -> Result<ExecutionOutcome, HarnessError> {
        self.calls
            .lock()
            .unwrap()
            .push((assignment.case.id.clone(), assignment.attempt));
        self.script
            .lock()
            .unwrap()
            .get_mut(&assignment.case.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(ExecutionOutcome::new(Verdict::Passed)))
    }
}

/// Connects `LocalLink`s and remembers their connection ids.
struct LocalConnector {
    coordinator: Arc<Coordinator>,
    connections: Mutex<Vec<String>>,
    failures_left: Mutex<u32>,
}

impl LocalConnector {
    fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            connections: Mutex::new(Vec::new()),
            failures_left: Mutex::new(0),
        }
    }

    fn failing(self, times: u32) -> Self {
        *self.failures_left.lock().unwrap() = times;
        self
    }

    fn connections(&self) -> Vec<String> {
        self.connections.lock().unwrap().clone()
    }
}

#[async_trait]
impl LinkConnector for LocalConnector {
    type Link = LocalLink;

    async fn connect(&self) -> Result<LocalLink, LinkError> {
        {
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(LinkError::Connection("refused".into()));
            }
        }
        let link = LocalLink::connect(self.coordinator.clone(), "127.0.0.1", 9000).await;
        self.connections
            .lock()
            .unwrap()
            .push(link.connection_id().to_string());
        Ok(link)
    }

    fn target(&self) -> String {
        "local".into()
    }
}

// ---------------------------------------------------------------------------
// Test: Verdicts are reported, including failed ones
// ---------------------------------------------------------------------------

#[tokio::test]
async fn loop_reports_every_verdict() {
    let coordinator = coordinator();
    let run_id = start(&coordinator, &["a", "b"]).await;
    let executor = Arc::new(
        ScriptedExecutor::default().then("b", Ok(ExecutionOutcome::new(Verdict::Failed))),
    );

    let link = LocalLink::connect(coordinator.clone(), "127.0.0.1", 9001).await;
    let cancel = CancellationToken::new();
    let worker = tokio::spawn({
        let cancel = cancel.clone();
        let executor = executor.clone();
        async move {
            WorkerLoop::new(link, executor)
                .with_backoff(fast_backoff())
                .run(&cancel)
                .await
        }
    });

    wait_for_status(&coordinator, run_id, RunStatus::Complete).await;
    cancel.cancel();
    let summary = worker.await.unwrap().unwrap();

    assert_eq!(summary.reported, 2);
    assert_eq!(summary.repaired, 0);
    let output = coordinator.poll(run_id).await.unwrap().output.unwrap();
    assert_eq!(output["summary"]["passed"], 1);
    assert_eq!(output["summary"]["failed"], 1);
}

// ---------------------------------------------------------------------------
// Test: Harness errors are repaired, never reported
// ---------------------------------------------------------------------------

#[tokio::test]
async fn harness_error_becomes_repair_and_case_reruns() {
    let coordinator = coordinator();
    let run_id = start(&coordinator, &["flaky"]).await;
    let executor = Arc::new(
        ScriptedExecutor::default().then("flaky", Err(HarnessError::new("browser crashed"))),
    );

    let link = LocalLink::connect(coordinator.clone(), "127.0.0.1", 9002).await;
    let cancel = CancellationToken::new();
    let worker = tokio::spawn({
        let cancel = cancel.clone();
        let executor: Arc<dyn AutomationExecutor> = executor.clone();
        async move {
            WorkerLoop::new(link, executor)
                .with_backoff(fast_backoff())
                .run(&cancel)
                .await
        }
    });

    wait_for_status(&coordinator, run_id, RunStatus::Complete).await;
    cancel.cancel();
    let summary = worker.await.unwrap().unwrap();

    assert_eq!(summary.repaired, 1);
    assert_eq!(summary.reported, 1);
    assert_eq!(
        executor.calls(),
        vec![("flaky".to_string(), 0), ("flaky".to_string(), 1)]
    );
    let output = coordinator.poll(run_id).await.unwrap().output.unwrap();
    assert_eq!(output["summary"]["passed"], 1);
    assert_eq!(output["summary"]["exhausted"], 0);
}

// ---------------------------------------------------------------------------
// Test: Empty pulls back off exponentially
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn empty_pulls_back_off() {
    let coordinator = coordinator();
    let link = LocalLink::connect(coordinator.clone(), "127.0.0.1", 9003).await;
    let cancel = CancellationToken::new();
    let worker = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            WorkerLoop::new(link, Arc::new(ScriptedExecutor::default()))
                .run(&cancel)
                .await
        }
    });

    // Pulls at 0, 250, 750 and 1750 ms; the next would be at 3750 ms.
    tokio::time::sleep(Duration::from_millis(1800)).await;
    cancel.cancel();
    let summary = worker.await.unwrap().unwrap();

    assert_eq!(summary.empty_pulls, 4);
    assert_eq!(summary.reported, 0);
}

// ---------------------------------------------------------------------------
// Test: Cancellation lets the case in progress finish
// ---------------------------------------------------------------------------

struct CancelDuringExecution {
    cancel: CancellationToken,
}

#[async_trait]
impl AutomationExecutor for CancelDuringExecution {
    async fn execute(&self, _assignment: &Assignment) -> Result<ExecutionOutcome, HarnessError> {
        self.cancel.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(ExecutionOutcome::new(Verdict::Passed))
    }
}

#[tokio::test]
async fn cancel_mid_case_still_reports() {
    let coordinator = coordinator();
    let run_id = start(&coordinator, &["only"]).await;
    let cancel = CancellationToken::new();
    let executor = Arc::new(CancelDuringExecution {
        cancel: cancel.clone(),
    });

    let link = LocalLink::connect(coordinator.clone(), "127.0.0.1", 9004).await;
    let summary = WorkerLoop::new(link, executor).run(&cancel).await.unwrap();

    assert_eq!(summary.reported, 1);
    let snapshot = coordinator.poll(run_id).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Complete);
}

// ---------------------------------------------------------------------------
// Test: Cancellation while a pull is outstanding still runs the case
// ---------------------------------------------------------------------------

/// Triggers cancellation after the pull request is sent and delays the reply.
struct CancelDuringPull {
    inner: LocalLink,
    cancel: CancellationToken,
}

#[async_trait]
impl CoordinatorLink for CancelDuringPull {
    async fn pull(&mut self) -> Result<Option<Assignment>, LinkError> {
        let pulled = self.inner.pull().await;
        self.cancel.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        pulled
    }

    async fn report(&mut self, key: &CaseKey, outcome: ExecutionOutcome) -> Result<(), LinkError> {
        self.inner.report(key, outcome).await
    }

    async fn repair(
        &mut self,
        key: &CaseKey,
        context: ExecutionContext,
        reason: String,
    ) -> Result<(), LinkError> {
        self.inner.repair(key, context, reason).await
    }

    async fn heartbeat(&mut self) -> Result<(), LinkError> {
        self.inner.heartbeat().await
    }
}

#[tokio::test]
async fn cancel_during_pull_executes_the_dispatched_case() {
    let coordinator = coordinator();
    let run_id = start(&coordinator, &["only"]).await;
    let cancel = CancellationToken::new();
    let executor = Arc::new(ScriptedExecutor::default());

    let link = CancelDuringPull {
        inner: LocalLink::connect(coordinator.clone(), "127.0.0.1", 9006).await,
        cancel: cancel.clone(),
    };
    let summary = WorkerLoop::new(link, executor.clone())
        .run(&cancel)
        .await
        .unwrap();

    assert_eq!(summary.reported, 1);
    assert_eq!(summary.empty_pulls, 0);
    assert_eq!(executor.calls(), vec![("only".to_string(), 0)]);
    let snapshot = coordinator.poll(run_id).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Complete);
    assert_eq!(snapshot.running, 0);
    assert!(coordinator.list_repairs().await.is_empty());
}

// ---------------------------------------------------------------------------
// Test: A link the coordinator dropped stops the loop with an error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn evicted_link_surfaces_as_error() {
    let coordinator = coordinator();
    let link = LocalLink::connect(coordinator.clone(), "127.0.0.1", 9005).await;
    let conn_id = link.connection_id().to_string();
    coordinator.disconnect_worker(&conn_id).await;

    let result = WorkerLoop::new(link, Arc::new(ScriptedExecutor::default()))
        .run(&CancellationToken::new())
        .await;

    assert_matches!(result, Err(LinkError::Connection(_)));
}

// ---------------------------------------------------------------------------
// Test: Pool spreads a run over several connections
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_completes_run_with_several_slots() {
    let coordinator = coordinator();
    let ids = ["c1", "c2", "c3", "c4", "c5", "c6"];
    let run_id = start(&coordinator, &ids).await;

    let connector = Arc::new(LocalConnector::new(coordinator.clone()));
    let executor = Arc::new(ScriptedExecutor::default());
    let cancel = CancellationToken::new();
    let slots = WorkerPool::new(connector.clone(), executor.clone(), 3)
        .with_pull_backoff(fast_backoff())
        .spawn(&cancel);

    wait_for_status(&coordinator, run_id, RunStatus::Complete).await;
    cancel.cancel();

    let mut reported = 0;
    for slot in slots {
        reported += slot.await.unwrap().reported;
    }
    assert_eq!(reported, 6);
    assert_eq!(connector.connections().len(), 3);
    assert_eq!(executor.calls().len(), 6);
}

// ---------------------------------------------------------------------------
// Test: Pool reconnects after the coordinator drops a connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pool_reconnects_after_eviction() {
    let coordinator = coordinator();
    let connector = Arc::new(LocalConnector::new(coordinator.clone()));
    let cancel = CancellationToken::new();
    let slots = WorkerPool::new(connector.clone(), Arc::new(ScriptedExecutor::default()), 1)
        .with_pull_backoff(fast_backoff())
        .with_reconnect_backoff(fast_backoff())
        .spawn(&cancel);

    while connector.connections().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let first = connector.connections()[0].clone();
    coordinator.disconnect_worker(&first).await;

    let run_id = start(&coordinator, &["after-reconnect"]).await;
    wait_for_status(&coordinator, run_id, RunStatus::Complete).await;
    cancel.cancel();
    for slot in slots {
        slot.await.unwrap();
    }

    let connections = connector.connections();
    assert!(connections.len() >= 2);
    assert_ne!(connections.last(), Some(&first));
}

// ---------------------------------------------------------------------------
// Test: Connecting retries with backoff and honours cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn connect_retries_until_success() {
    let connector = LocalConnector::new(coordinator()).failing(2);

    let link = connect_with_backoff(&connector, &BackoffConfig::reconnect(), &CancellationToken::new()).await;

    assert!(link.is_some());
    assert_eq!(connector.connections().len(), 1);
}

#[tokio::test]
async fn connect_gives_up_when_cancelled() {
    let connector = LocalConnector::new(coordinator()).failing(u32::MAX);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let link = connect_with_backoff(&connector, &BackoffConfig::reconnect(), &cancel).await;

    assert!(link.is_none());
    assert!(connector.connections().is_empty());
}
