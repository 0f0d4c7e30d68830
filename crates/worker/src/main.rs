use std::sync::Arc;
use std::time::Duration;

use caseflow_worker::command::CommandExecutor;
use caseflow_worker::config::WorkerConfig;
use caseflow_worker::pool::{WorkerPool, WsConnector};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "caseflow_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    tracing::info!(
        coordinator_url = %config.coordinator_url,
        concurrency = config.concurrency,
        "Worker starting",
    );

    let executor = Arc::new(CommandExecutor::new(config.shell.clone(), config.case_timeout));
    let cancel = CancellationToken::new();
    let slots = WorkerPool::new(
        Arc::new(WsConnector::new(config.coordinator_url.clone())),
        executor,
        config.concurrency,
    )
    .spawn(&cancel);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl-C, finishing cases in progress");
    cancel.cancel();

    // Cases in progress run to completion; give them their full timeout.
    let grace = config.case_timeout + Duration::from_secs(5);
    for slot in slots {
        match tokio::time::timeout(grace, slot).await {
            Ok(Ok(summary)) => tracing::debug!(
                reported = summary.reported,
                repaired = summary.repaired,
                "Slot finished",
            ),
            Ok(Err(e)) => tracing::error!(error = %e, "Worker slot panicked"),
            Err(_) => tracing::warn!("Worker slot did not stop in time"),
        }
    }

    tracing::info!("Worker stopped");
    Ok(())
}
