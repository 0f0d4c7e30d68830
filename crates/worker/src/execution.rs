//! The worker execution loop: pull, execute, report.

use std::sync::Arc;

use caseflow_core::case::Assignment;
use caseflow_core::collaborators::AutomationExecutor;
use caseflow_core::link::{CoordinatorLink, LinkError};
use tokio_util::sync::CancellationToken;

use crate::backoff::{next_delay, sleep_or_cancel, BackoffConfig};

/// What one loop did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Cases that ran to a verdict and were reported.
    pub reported: u64,
    /// Cases whose execution crashed and were handed back for repair.
    pub repaired: u64,
    /// Pulls that found nothing to do.
    pub empty_pulls: u64,
}

/// Drives one connection: pull a case, execute it, send the outcome back.
///
/// A crashed execution (`HarnessError`) is sent as a repair, never as a
/// report. Empty pulls back off exponentially; the delay resets after a
/// successful pull. Cancellation is observed only before a pull is sent: a
/// pull already on the wire is awaited and, if it yields a case, that case is
/// executed and reported before the loop stops.
pub struct WorkerLoop<L> {
    link: L,
    executor: Arc<dyn AutomationExecutor>,
    backoff: BackoffConfig,
    summary: LoopSummary,
}

impl<L: CoordinatorLink> WorkerLoop<L> {
    pub fn new(link: L, executor: Arc<dyn AutomationExecutor>) -> Self {
        Self {
            link,
            executor,
            backoff: BackoffConfig::pull(),
            summary: LoopSummary::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run until cancelled (`Ok`) or the link fails (`Err`).
    pub async fn run(mut self, cancel: &CancellationToken) -> Result<LoopSummary, LinkError> {
        self.link.heartbeat().await?;
        let mut delay = self.backoff.initial_delay;

        while !cancel.is_cancelled() {
            // The coordinator marks a case in flight as soon as it sees the
            // pull, so the reply must be consumed.
            match self.link.pull().await? {
                Some(assignment) => {
                    delay = self.backoff.initial_delay;
                    self.execute(assignment).await?;
                }
                None => {
                    self.summary.empty_pulls += 1;
                    tracing::trace!(delay_ms = delay.as_millis() as u64, "Nothing pending");
                    if !sleep_or_cancel(delay, cancel).await {
                        break;
                    }
                    delay = next_delay(delay, &self.backoff);
                }
            }
        }

        tracing::info!(
            reported = self.summary.reported,
            repaired = self.summary.repaired,
            "Worker loop stopped",
        );
        Ok(self.summary)
    }

    async fn execute(&mut self, assignment: Assignment) -> Result<(), LinkError> {
        let key = assignment.key();
        tracing::debug!(%key, attempt = assignment.attempt, "Executing case");

        match self.executor.execute(&assignment).await {
            Ok(outcome) => {
                tracing::info!(%key, verdict = ?outcome.verdict, "Case finished");
                self.link.report(&key, outcome).await?;
                self.summary.reported += 1;
            }
            Err(e) => {
                tracing::warn!(%key, error = %e, "Harness error, requesting repair");
                self.link
                    .repair(&key, assignment.context, e.message)
                    .await?;
                self.summary.repaired += 1;
            }
        }
        Ok(())
    }
}
