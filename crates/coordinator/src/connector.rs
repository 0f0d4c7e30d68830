//! Result connectors.
//!
//! Every run gets a [`RunOwner`]: the connector the dispatch queue forwards
//! results to. It fans a result out to the run's named external connectors
//! and then folds it into the [`RunTracker`]. External connectors are looked
//! up by name in the [`ConnectorRegistry`] when the run starts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use caseflow_core::case::CaseResult;
use caseflow_core::collaborators::{CaseDelivery, Connector, DeliveryError};
use caseflow_core::error::CoreError;
use caseflow_core::types::RunId;
use caseflow_events::delivery::webhook::{WebhookDelivery, WebhookError};

use crate::tracker::RunTracker;

// ---------------------------------------------------------------------------
// RunOwner
// ---------------------------------------------------------------------------

pub struct RunOwner {
    run_id: RunId,
    tracker: Arc<RunTracker>,
    connectors: Vec<Arc<dyn Connector>>,
    closed: AtomicBool,
}

impl RunOwner {
    pub fn new(run_id: RunId, tracker: Arc<RunTracker>, connectors: Vec<Arc<dyn Connector>>) -> Self {
        Self {
            run_id,
            tracker,
            connectors,
            closed: AtomicBool::new(false),
        }
    }

    /// Stop accepting results. Called when the run is deleted.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[async_trait]
impl Connector for RunOwner {
    fn name(&self) -> &str {
        "run-owner"
    }

    async fn receive_result(&self, delivery: &CaseDelivery) -> Result<(), DeliveryError> {
        if !self.is_alive() {
            return Err(DeliveryError::OwnerGone(self.run_id));
        }

        for connector in &self.connectors {
            connector.receive_result(delivery).await?;
        }

        let result = CaseResult::reported(
            delivery.key.case_id.clone(),
            delivery.verdict,
            delivery.output.clone(),
        )
        .with_context(delivery.context.clone());

        match self.tracker.fold(self.run_id, result).await {
            Ok(_) => Ok(()),
            Err(CoreError::NotFound { entity: "Run", .. }) => Err(DeliveryError::OwnerGone(self.run_id)),
            Err(e) => Err(DeliveryError::Rejected {
                name: self.name().to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// WebhookConnector
// ---------------------------------------------------------------------------

/// POSTs every case result to a URL. A single attempt per delivery: a failed
/// POST sends the case through the repair path, which re-executes it.
pub struct WebhookConnector {
    name: String,
    url: String,
    delivery: WebhookDelivery,
}

impl WebhookConnector {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            delivery: WebhookDelivery::new().with_retry_delays(Vec::new()),
        }
    }
}

#[async_trait]
impl Connector for WebhookConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive_result(&self, delivery: &CaseDelivery) -> Result<(), DeliveryError> {
        let body = serde_json::json!({
            "run_id": delivery.key.run_id,
            "case_id": delivery.key.case_id,
            "verdict": delivery.verdict,
            "output": delivery.output,
            "context": delivery.context,
            "attempt": delivery.attempt,
        });
        self.delivery
            .deliver(&self.url, &body)
            .await
            .map_err(|e| match e {
                WebhookError::HttpStatus(status) => DeliveryError::Rejected {
                    name: self.name.clone(),
                    message: format!("HTTP {status}"),
                },
                WebhookError::Request(e) => DeliveryError::Transport(e.to_string()),
            })
    }
}

// ---------------------------------------------------------------------------
// ConnectorRegistry
// ---------------------------------------------------------------------------

/// Named external connectors a run configuration may refer to.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.name().to_string(), connector);
    }

    pub fn with(mut self, connector: Arc<dyn Connector>) -> Self {
        self.register(connector);
        self
    }

    /// Resolve connector names, failing on the first unknown name.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<dyn Connector>>, CoreError> {
        names
            .iter()
            .map(|name| {
                self.connectors.get(name).cloned().ok_or_else(|| {
                    CoreError::Validation(format!("Unknown connector: \"{name}\""))
                })
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connectors.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::RunSpec;
    use assert_matches::assert_matches;
    use caseflow_core::case::{TestCase, Verdict};
    use caseflow_core::context::ExecutionContext;
    use caseflow_core::run::RunStatus;
    use caseflow_core::types::CaseKey;
    use caseflow_events::EventBus;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct Recording {
        name: &'static str,
        seen: StdMutex<Vec<String>>,
        fail: bool,
    }

    impl Recording {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                seen: StdMutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl Connector for Recording {
        fn name(&self) -> &str {
            self.name
        }

        async fn receive_result(&self, delivery: &CaseDelivery) -> Result<(), DeliveryError> {
            if self.fail {
                return Err(DeliveryError::Transport("down".into()));
            }
            self.seen.lock().unwrap().push(delivery.key.case_id.clone());
            Ok(())
        }
    }

    async fn tracked_run(tracker: &RunTracker) -> RunId {
        let id = uuid::Uuid::now_v7();
        tracker
            .create(RunSpec {
                id,
                input: serde_json::Value::Null,
                case_ids: vec!["a".into()],
                max_failures: 0,
                timeout: Duration::from_secs(60),
            })
            .await
            .unwrap();
        id
    }

    fn delivery(run_id: RunId) -> CaseDelivery {
        CaseDelivery {
            key: CaseKey::new(run_id, "a"),
            case: TestCase::new("a"),
            verdict: Verdict::Passed,
            output: serde_json::Value::Null,
            context: ExecutionContext::new(),
            attempt: 0,
        }
    }

    #[tokio::test]
    async fn owner_fans_out_then_folds() {
        let tracker = Arc::new(RunTracker::new(Arc::new(EventBus::default())));
        let run_id = tracked_run(&tracker).await;
        let external = Recording::new("ext", false);
        let owner = RunOwner::new(run_id, tracker.clone(), vec![external.clone()]);

        owner.receive_result(&delivery(run_id)).await.unwrap();

        assert_eq!(*external.seen.lock().unwrap(), vec!["a".to_string()]);
        assert_eq!(
            tracker.snapshot(run_id, false).await.unwrap().status,
            RunStatus::Complete
        );
    }

    #[tokio::test]
    async fn failing_external_connector_blocks_fold() {
        let tracker = Arc::new(RunTracker::new(Arc::new(EventBus::default())));
        let run_id = tracked_run(&tracker).await;
        let owner = RunOwner::new(run_id, tracker.clone(), vec![Recording::new("ext", true)]);

        assert_matches!(
            owner.receive_result(&delivery(run_id)).await,
            Err(DeliveryError::Transport(_))
        );
        assert_eq!(tracker.snapshot(run_id, false).await.unwrap().completed, 0);
    }

    #[tokio::test]
    async fn closed_owner_is_gone() {
        let tracker = Arc::new(RunTracker::new(Arc::new(EventBus::default())));
        let run_id = tracked_run(&tracker).await;
        let owner = RunOwner::new(run_id, tracker, Vec::new());
        owner.close();

        assert!(!owner.is_alive());
        assert_matches!(
            owner.receive_result(&delivery(run_id)).await,
            Err(DeliveryError::OwnerGone(id)) if id == run_id
        );
    }

    #[tokio::test]
    async fn deleted_run_is_owner_gone() {
        let tracker = Arc::new(RunTracker::new(Arc::new(EventBus::default())));
        let run_id = tracked_run(&tracker).await;
        let owner = RunOwner::new(run_id, tracker.clone(), Vec::new());
        tracker.delete(run_id).await.unwrap();

        assert_matches!(
            owner.receive_result(&delivery(run_id)).await,
            Err(DeliveryError::OwnerGone(_))
        );
    }

    #[test]
    fn registry_resolves_names() {
        let registry = ConnectorRegistry::new()
            .with(Recording::new("slack", false))
            .with(Recording::new("jira", false));

        assert_eq!(registry.names(), vec!["jira", "slack"]);
        assert_eq!(registry.resolve(&["slack".into()]).unwrap().len(), 1);
        assert_matches!(
            registry.resolve(&["teams".into()]).map(|found| found.len()),
            Err(CoreError::Validation(msg)) if msg.contains("teams")
        );
    }

    #[tokio::test]
    async fn webhook_connector_maps_transport_errors() {
        let connector = WebhookConnector::new("hook", "http://127.0.0.1:9/results");
        assert_matches!(
            connector.receive_result(&delivery(uuid::Uuid::nil())).await,
            Err(DeliveryError::Transport(_))
        );
    }
}
