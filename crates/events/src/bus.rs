//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`RunEvent`]s. It is shared
//! via `Arc<EventBus>` between the coordinator and its reporters.

use caseflow_core::types::{CaseId, RunId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A run was accepted and its cases were enqueued.
pub const EVENT_RUN_STARTED: &str = "run.started";

/// Every constituent case reported and the run succeeded.
pub const EVENT_RUN_COMPLETED: &str = "run.completed";

/// The run failed (repair budget exhausted or run timeout).
pub const EVENT_RUN_FAILED: &str = "run.failed";

/// A case was re-enqueued by the repair path.
pub const EVENT_CASE_REPAIRED: &str = "case.repaired";

/// A case ran out of repair attempts.
pub const EVENT_CASE_EXHAUSTED: &str = "case.exhausted";

// ---------------------------------------------------------------------------
// RunEvent
// ---------------------------------------------------------------------------

/// A lifecycle event for a run or one of its cases.
///
/// Constructed via [`RunEvent::new`] and enriched with
/// [`with_case`](RunEvent::with_case) and
/// [`with_payload`](RunEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// Dot-separated event name, e.g. `"run.completed"`.
    pub event_type: String,

    pub run_id: RunId,

    /// Set for case-level events.
    pub case_id: Option<CaseId>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    pub timestamp: Timestamp,
}

impl RunEvent {
    pub fn new(event_type: impl Into<String>, run_id: RunId) -> Self {
        Self {
            event_type: event_type.into(),
            run_id,
            case_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_case(mut self, case_id: impl Into<CaseId>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Whether this event marks the end of a run.
    pub fn is_terminal(&self) -> bool {
        self.event_type == EVENT_RUN_COMPLETED || self.event_type == EVENT_RUN_FAILED
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use caseflow_events::bus::{EventBus, RunEvent, EVENT_RUN_STARTED};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(RunEvent::new(EVENT_RUN_STARTED, uuid::Uuid::new_v4()));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
