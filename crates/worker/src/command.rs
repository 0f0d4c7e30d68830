//! Executes test cases as shell commands.
//!
//! A case's payload names the command to run:
//!
//! ```json
//! { "command": "npm test -- --grep login", "timeout_secs": 120 }
//! ```
//!
//! Exit status zero is `passed`, any other exit status is `failed`. A case
//! without a command is `skipped`. Failing to launch the command, or the
//! command outliving its timeout, is a harness error.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use caseflow_core::case::{Assignment, ExecutionOutcome, Verdict};
use caseflow_core::collaborators::{AutomationExecutor, HarnessError};
use serde_json::json;
use tokio::process::Command;

/// Output kept from each stream, in bytes from the end.
const OUTPUT_TAIL_BYTES: usize = 4096;

pub struct CommandExecutor {
    shell: String,
    default_timeout: Duration,
}

impl CommandExecutor {
    pub fn new(shell: impl Into<String>, default_timeout: Duration) -> Self {
        Self {
            shell: shell.into(),
            default_timeout,
        }
    }
}

#[async_trait]
impl AutomationExecutor for CommandExecutor {
    async fn execute(&self, assignment: &Assignment) -> Result<ExecutionOutcome, HarnessError> {
        let payload = &assignment.case.payload;
        let Some(command) = payload.get("command").and_then(|c| c.as_str()) else {
            return Ok(ExecutionOutcome::new(Verdict::Skipped)
                .with_output(json!({ "reason": "case payload has no command" })));
        };
        let timeout = payload
            .get("timeout_secs")
            .and_then(|t| t.as_u64())
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let started = Instant::now();
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .env("CASEFLOW_RUN_ID", assignment.run_id.to_string())
            .env("CASEFLOW_CASE_ID", &assignment.case.id)
            .env("CASEFLOW_SETTINGS", assignment.settings.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarnessError::new(format!("failed to launch '{command}': {e}")))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| HarnessError::new(format!("'{command}' exceeded {}s", timeout.as_secs())))?
            .map_err(|e| HarnessError::new(format!("failed to collect '{command}' output: {e}")))?;

        let verdict = if output.status.success() {
            Verdict::Passed
        } else {
            Verdict::Failed
        };

        Ok(ExecutionOutcome::new(verdict).with_output(json!({
            "exit_code": output.status.code(),
            "duration_ms": started.elapsed().as_millis() as u64,
            "stdout": tail(&output.stdout),
            "stderr": tail(&output.stderr),
        })))
    }
}

fn tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(OUTPUT_TAIL_BYTES);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}
