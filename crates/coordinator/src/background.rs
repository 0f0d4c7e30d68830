//! Periodic coordinator passes.
//!
//! Each loop is a single long-lived Tokio task stopped through a
//! [`CancellationToken`]. Both loops call the same coordinator operations
//! the worker surface uses, so they take the same locks in the same order.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::service::Coordinator;

/// Fails in-flight cases past the running timeout and runs past their
/// deadline.
pub struct TimeoutSweeper {
    coordinator: Arc<Coordinator>,
    interval: Duration,
}

impl TimeoutSweeper {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        let interval = coordinator.config().sweep_interval;
        Self {
            coordinator,
            interval,
        }
    }

    /// Run the sweep loop until the cancellation token is triggered.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Timeout sweeper started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Timeout sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let cases = self.coordinator.sweep_running_timeouts().await;
                    let runs = self.coordinator.sweep_run_timeouts().await;
                    if cases > 0 || runs > 0 {
                        tracing::info!(cases, runs, "Timeout sweep expired work");
                    }
                }
            }
        }
    }
}

/// Probes workers and declares silent ones dead.
pub struct LivenessMonitor {
    coordinator: Arc<Coordinator>,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        let interval = coordinator.config().heartbeat_interval;
        Self {
            coordinator,
            interval,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Liveness monitor started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Liveness monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let dead = self.coordinator.check_liveness().await;
                    if dead > 0 {
                        tracing::warn!(dead, "Workers declared dead");
                    }
                }
            }
        }
    }
}

/// Spawn both loops on the current runtime.
pub fn spawn_all(
    coordinator: &Arc<Coordinator>,
    cancel: &CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    vec![
        tokio::spawn(TimeoutSweeper::new(coordinator.clone()).run(cancel.clone())),
        tokio::spawn(LivenessMonitor::new(coordinator.clone()).run(cancel.clone())),
    ]
}
