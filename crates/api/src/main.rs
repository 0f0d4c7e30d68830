use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use caseflow_events::RunReporter;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use caseflow_api::config::ServerConfig;
use caseflow_api::router::build_app_router;
use caseflow_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "caseflow_api=debug,caseflow_coordinator=debug,caseflow_events=info,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = config.port,
        auto_repair = config.coordinator.auto_repair,
        max_repair_attempts = config.coordinator.max_repair_attempts,
        "Loaded server configuration",
    );
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);

    // --- Coordinator and event services ---
    let state = AppState::from_config(config.clone());

    let reporter_handle = tokio::spawn(RunReporter::from_env().run(state.event_bus.subscribe()));
    tracing::info!("Run reporter started");

    let background_cancel = CancellationToken::new();
    let background_handles =
        caseflow_coordinator::background::spawn_all(&state.coordinator, &background_cancel);
    tracing::info!(tasks = background_handles.len(), "Background tasks started");

    // --- Router ---
    let app = build_app_router(state.clone(), &config);

    // --- Start server ---
    let host = config
        .host
        .parse::<IpAddr>()
        .with_context(|| format!("Invalid HOST address '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    background_cancel.cancel();
    for handle in background_handles {
        let _ = tokio::time::timeout(shutdown_timeout, handle).await;
    }
    tracing::info!("Background tasks stopped");

    tracing::info!(
        workers = state.coordinator.worker_count().await,
        "Closing remaining worker connections",
    );
    state.coordinator.shutdown().await;

    // Dropping the last bus handle closes the broadcast channel, which
    // stops the reporter.
    drop(state);
    let _ = tokio::time::timeout(shutdown_timeout, reporter_handle).await;
    tracing::info!("Event services shut down");

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
