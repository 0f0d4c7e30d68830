//! Runs several independent worker loops in one process.
//!
//! Each slot owns its own connection. When a link fails, the slot
//! reconnects with exponential backoff and starts a fresh loop; the
//! coordinator has already sent whatever that connection had in flight
//! to repair.

use std::sync::Arc;

use async_trait::async_trait;
use caseflow_core::collaborators::AutomationExecutor;
use caseflow_core::link::{CoordinatorLink, LinkError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::{next_delay, sleep_or_cancel, BackoffConfig};
use crate::client::WsLink;
use crate::execution::{LoopSummary, WorkerLoop};

/// Opens new links to the coordinator.
#[async_trait]
pub trait LinkConnector: Send + Sync + 'static {
    type Link: CoordinatorLink + 'static;

    async fn connect(&self) -> Result<Self::Link, LinkError>;

    /// Where this connector points, for logs.
    fn target(&self) -> String;
}

/// Connects over WebSocket.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl LinkConnector for WsConnector {
    type Link = WsLink;

    async fn connect(&self) -> Result<WsLink, LinkError> {
        WsLink::connect(&self.url).await
    }

    fn target(&self) -> String {
        self.url.clone()
    }
}

/// Connect with exponential backoff.
///
/// Returns `Some(link)` once a connection succeeds, or `None` if the
/// `cancel` token is triggered first.
pub async fn connect_with_backoff<C: LinkConnector>(
    connector: &C,
    config: &BackoffConfig,
    cancel: &CancellationToken,
) -> Option<C::Link> {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(target_url = %connector.target(), "Connect cancelled");
                return None;
            }
            result = connector.connect() => {
                match result {
                    Ok(link) => {
                        if attempt > 1 {
                            tracing::info!(target_url = %connector.target(), attempt, "Reconnected to coordinator");
                        }
                        return Some(link);
                    }
                    Err(e) => {
                        tracing::warn!(
                            target_url = %connector.target(),
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "Connect attempt {attempt} failed",
                        );
                    }
                }
            }
        }

        if !sleep_or_cancel(delay, cancel).await {
            return None;
        }
        delay = next_delay(delay, config);
    }
}

pub struct WorkerPool<C> {
    connector: Arc<C>,
    executor: Arc<dyn AutomationExecutor>,
    concurrency: usize,
    pull_backoff: BackoffConfig,
    reconnect_backoff: BackoffConfig,
}

impl<C: LinkConnector> WorkerPool<C> {
    pub fn new(connector: Arc<C>, executor: Arc<dyn AutomationExecutor>, concurrency: usize) -> Self {
        Self {
            connector,
            executor,
            concurrency: concurrency.max(1),
            pull_backoff: BackoffConfig::pull(),
            reconnect_backoff: BackoffConfig::reconnect(),
        }
    }

    pub fn with_pull_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.pull_backoff = backoff;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Spawn one supervised loop per slot. Each task resolves to the summary
    /// of the loop that was running when the pool was cancelled.
    pub fn spawn(self, cancel: &CancellationToken) -> Vec<JoinHandle<LoopSummary>> {
        tracing::info!(
            concurrency = self.concurrency,
            target_url = %self.connector.target(),
            "Starting worker pool",
        );
        (0..self.concurrency)
            .map(|slot| {
                tokio::spawn(supervise(
                    slot,
                    self.connector.clone(),
                    self.executor.clone(),
                    self.pull_backoff.clone(),
                    self.reconnect_backoff.clone(),
                    cancel.clone(),
                ))
            })
            .collect()
    }
}

async fn supervise<C: LinkConnector>(
    slot: usize,
    connector: Arc<C>,
    executor: Arc<dyn AutomationExecutor>,
    pull_backoff: BackoffConfig,
    reconnect_backoff: BackoffConfig,
    cancel: CancellationToken,
) -> LoopSummary {
    let mut last = LoopSummary::default();

    while let Some(link) = connect_with_backoff(connector.as_ref(), &reconnect_backoff, &cancel).await {
        tracing::debug!(slot, "Worker slot connected");
        let result = WorkerLoop::new(link, executor.clone())
            .with_backoff(pull_backoff.clone())
            .run(&cancel)
            .await;

        match result {
            Ok(summary) => {
                last = summary;
                break;
            }
            Err(e) => {
                tracing::warn!(slot, error = %e, "Worker link failed, reconnecting");
            }
        }
    }

    tracing::info!(slot, "Worker slot stopped");
    last
}
