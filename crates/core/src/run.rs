//! Run configuration, run status state machine and poll snapshots.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::case::TestCase;
use crate::error::CoreError;
use crate::types::{RunId, Timestamp};

/// Maximum length of a test case identifier.
const MAX_CASE_ID_LEN: usize = 256;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Aggregate status of a run.
///
/// Transitions are monotonic: `Pending -> Running -> {Complete | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Complete | RunStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects the state machine.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Complete)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }

    /// Status code mirroring the outcome of the run.
    pub fn status_code(self) -> u16 {
        match self {
            RunStatus::Pending | RunStatus::Running => 202,
            RunStatus::Complete => 200,
            RunStatus::Failed => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Complete => "complete",
            RunStatus::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// A submitted run: the test cases to execute plus run-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RunConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[validate(length(min = 1, message = "configuration must name at least one test case"))]
    pub test_cases: Vec<TestCase>,

    /// Settings handed to every worker together with its case.
    #[serde(default)]
    pub settings: Value,

    /// Names of registered connectors that receive every case result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connectors: Vec<String>,

    /// Per-run override of the repair attempt budget (per case).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_repair_attempts: Option<u32>,

    /// Number of repair-exhausted cases tolerated before the run fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_failures: Option<u32>,

    /// Per-run override of the run timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl RunConfiguration {
    pub fn new(test_cases: Vec<TestCase>) -> Self {
        Self {
            name: None,
            test_cases,
            settings: Value::Null,
            connectors: Vec::new(),
            max_repair_attempts: None,
            max_failures: None,
            timeout_secs: None,
        }
    }
}

/// Validate that a configuration can be fanned out into cases.
///
/// Rules:
/// - At least one test case.
/// - Case ids are non-empty, at most `MAX_CASE_ID_LEN` characters, and
///   unique within the run.
pub fn validate_configuration(config: &RunConfiguration) -> Result<(), CoreError> {
    config
        .validate()
        .map_err(|e| CoreError::Validation(e.to_string()))?;

    let mut seen = HashSet::with_capacity(config.test_cases.len());
    for (i, case) in config.test_cases.iter().enumerate() {
        if case.id.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "Test case at index {i} has an empty id"
            )));
        }
        if case.id.len() > MAX_CASE_ID_LEN {
            return Err(CoreError::Validation(format!(
                "Test case id at index {i} exceeds {MAX_CASE_ID_LEN} characters"
            )));
        }
        if !seen.insert(case.id.as_str()) {
            return Err(CoreError::Validation(format!(
                "Duplicate test case id: \"{}\"",
                case.id
            )));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Handles and snapshots
// ---------------------------------------------------------------------------

/// Returned to the submitter by `Start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHandle {
    pub id: RunId,
    pub poll_endpoint: String,
}

/// Point-in-time view of a run, as returned by `Poll`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub id: RunId,
    pub status: RunStatus,
    pub status_code: u16,
    pub progress: f64,
    pub total: usize,
    pub completed: usize,
    pub running: usize,
    pub pending: usize,
    pub failed: usize,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Present once the run is terminal and the single-run variant was used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}
