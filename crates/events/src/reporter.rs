//! Renders runs once they reach a terminal status.
//!
//! [`RunReporter`] subscribes to the [`EventBus`](crate::bus::EventBus) and,
//! for every `run.completed` / `run.failed` event, logs a one-line summary
//! and optionally POSTs the run output to a webhook. It runs as a long-lived
//! background task and exits when the bus sender is dropped.

use tokio::sync::broadcast;

use crate::bus::RunEvent;
use crate::delivery::webhook::WebhookDelivery;

pub struct RunReporter {
    webhook_url: Option<String>,
    delivery: WebhookDelivery,
}

impl RunReporter {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            webhook_url,
            delivery: WebhookDelivery::new(),
        }
    }

    /// Reporter configured from `RUN_REPORT_WEBHOOK_URL` (unset = log only).
    pub fn from_env() -> Self {
        let url = std::env::var("RUN_REPORT_WEBHOOK_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Self::new(url)
    }

    /// Run the reporting loop until the bus is closed.
    pub async fn run(self, mut receiver: broadcast::Receiver<RunEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) if event.is_terminal() => self.report(&event).await,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Run reporter lagged, some runs were not reported");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, run reporter shutting down");
                    break;
                }
            }
        }
    }

    async fn report(&self, event: &RunEvent) {
        let summary = render_summary(event);
        if event.event_type == crate::bus::EVENT_RUN_FAILED {
            tracing::warn!(run_id = %event.run_id, "{summary}");
        } else {
            tracing::info!(run_id = %event.run_id, "{summary}");
        }

        if let Some(url) = &self.webhook_url {
            let body = serde_json::json!({
                "event_type": event.event_type,
                "run_id": event.run_id,
                "output": event.payload,
                "timestamp": event.timestamp,
            });
            if let Err(e) = self.delivery.deliver(url, &body).await {
                tracing::error!(run_id = %event.run_id, error = %e, "Failed to deliver run report");
            }
        }
    }
}

/// One-line human summary of a terminal run event.
///
/// Reads the `summary` object of the run output payload; missing counters
/// render as zero.
pub fn render_summary(event: &RunEvent) -> String {
    let summary = &event.payload["summary"];
    let count = |field: &str| summary[field].as_u64().unwrap_or(0);
    format!(
        "Run {} {}: {} total, {} passed, {} failed, {} skipped, {} exhausted",
        event.run_id,
        event.event_type.trim_start_matches("run."),
        count("total"),
        count("passed"),
        count("failed"),
        count("skipped"),
        count("exhausted"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventBus, EVENT_RUN_COMPLETED, EVENT_RUN_FAILED};

    #[test]
    fn summary_reads_counters() {
        let event = RunEvent::new(EVENT_RUN_FAILED, uuid::Uuid::nil()).with_payload(
            serde_json::json!({
                "summary": {"total": 2, "passed": 1, "failed": 0, "skipped": 0, "exhausted": 1}
            }),
        );
        let line = render_summary(&event);
        assert!(line.contains("failed: 2 total, 1 passed"));
        assert!(line.ends_with("1 exhausted"));
    }

    #[test]
    fn summary_tolerates_missing_payload() {
        let event = RunEvent::new(EVENT_RUN_COMPLETED, uuid::Uuid::nil());
        assert!(render_summary(&event).contains("0 total"));
    }

    #[tokio::test]
    async fn reporter_stops_when_bus_dropped() {
        let bus = EventBus::default();
        let handle = tokio::spawn(RunReporter::new(None).run(bus.subscribe()));

        bus.publish(RunEvent::new(EVENT_RUN_COMPLETED, uuid::Uuid::nil()));
        drop(bus);

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("reporter should exit")
            .expect("reporter task should not panic");
    }
}
