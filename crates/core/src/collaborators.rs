//! Interfaces of the external collaborators the coordinator relies on.
//!
//! - [`AutomationExecutor`] runs one test case inside a worker.
//! - [`Connector`] receives finished cases on behalf of the run owner.
//! - [`ConfigurationStore`] resolves stored run configurations by id.

use async_trait::async_trait;
use serde_json::Value;

use crate::case::{Assignment, ExecutionOutcome, TestCase, Verdict};
use crate::context::ExecutionContext;
use crate::error::CoreError;
use crate::run::RunConfiguration;
use crate::types::{CaseKey, RunId};

// ---------------------------------------------------------------------------
// Automation executor
// ---------------------------------------------------------------------------

/// The automation engine itself failed, as opposed to the test failing.
///
/// Always routed to repair, never reported as a case result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Harness error: {message}")]
pub struct HarnessError {
    pub message: String,
}

impl HarnessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait AutomationExecutor: Send + Sync {
    /// Execute one case. Test failures are `Ok` with a `Failed` verdict.
    async fn execute(&self, assignment: &Assignment) -> Result<ExecutionOutcome, HarnessError>;
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// A finished case on its way to the run owner.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseDelivery {
    pub key: CaseKey,
    pub case: TestCase,
    pub verdict: Verdict,
    pub output: Value,
    pub context: ExecutionContext,
    pub attempt: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The run that owned the case no longer exists.
    #[error("Owner of run {0} is gone")]
    OwnerGone(RunId),

    /// A connector refused the result.
    #[error("Connector '{name}' rejected result: {message}")]
    Rejected { name: String, message: String },

    /// The connector could not be reached.
    #[error("Connector transport failure: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Name used in logs and in `RunConfiguration::connectors`.
    fn name(&self) -> &str;

    /// Deliver a finished case. Any error routes the case to repair.
    async fn receive_result(&self, delivery: &CaseDelivery) -> Result<(), DeliveryError>;

    /// Whether the owner can still accept results at all.
    fn is_alive(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Configuration store
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Look up a stored configuration; unknown ids yield `CoreError::NotFound`.
    async fn get_configuration(&self, id: &str) -> Result<RunConfiguration, CoreError>;
}
