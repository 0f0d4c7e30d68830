//! Test cases, dispatch assignments and execution outcomes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::types::{CaseId, CaseKey, RunId};

/// One test case as submitted. The coordinator only looks at `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: CaseId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Opaque specification handed to the automation executor.
    #[serde(default)]
    pub payload: Value,
}

impl TestCase {
    pub fn new(id: impl Into<CaseId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Verdict of a test case that executed to completion.
///
/// A failed assertion is a `Failed` verdict, which is a legitimate result.
/// An engine crash is not a verdict at all; see
/// [`HarnessError`](crate::collaborators::HarnessError).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    Skipped,
}

/// Work pushed to a worker on dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub run_id: RunId,
    pub case: TestCase,
    pub context: ExecutionContext,
    /// Run-level settings relevant to this case.
    #[serde(default)]
    pub settings: Value,
    /// Number of earlier dispatches of this case that ended in repair.
    #[serde(default)]
    pub attempt: u32,
}

impl Assignment {
    pub fn key(&self) -> CaseKey {
        CaseKey::new(self.run_id, self.case.id.clone())
    }
}

/// What the automation executor returns for a case that ran to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub verdict: Verdict,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub context: ExecutionContext,
}

impl ExecutionOutcome {
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            output: Value::Null,
            context: ExecutionContext::new(),
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }
}

/// A constituent result folded into a run.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseResult {
    pub case_id: CaseId,
    pub outcome: CaseOutcome,
    pub context: ExecutionContext,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaseOutcome {
    /// The case executed and its result reached the owner.
    Reported { verdict: Verdict, output: Value },
    /// The repair budget ran out; no trustworthy result exists.
    Exhausted { reason: String, attempts: u32 },
}

impl CaseResult {
    pub fn reported(case_id: impl Into<CaseId>, verdict: Verdict, output: Value) -> Self {
        Self {
            case_id: case_id.into(),
            outcome: CaseOutcome::Reported { verdict, output },
            context: ExecutionContext::new(),
        }
    }

    pub fn exhausted(case_id: impl Into<CaseId>, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            case_id: case_id.into(),
            outcome: CaseOutcome::Exhausted {
                reason: reason.into(),
                attempts,
            },
            context: ExecutionContext::new(),
        }
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }
}
