use std::sync::Arc;

use caseflow_coordinator::{
    ConnectorRegistry, Coordinator, InMemoryConfigurationStore, WebhookConnector,
};
use caseflow_events::EventBus;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Dispatch queue, run tracker, repair path and worker registry.
    pub coordinator: Arc<Coordinator>,
    /// Stored run configurations (also the coordinator's configuration store).
    pub configurations: Arc<InMemoryConfigurationStore>,
    /// Run lifecycle events.
    pub event_bus: Arc<EventBus>,
}

impl AppState {
    /// Build the coordinator and its collaborators from configuration.
    pub fn from_config(config: ServerConfig) -> Self {
        let event_bus = Arc::new(EventBus::default());
        let configurations = Arc::new(InMemoryConfigurationStore::new());

        let mut connectors = ConnectorRegistry::new();
        for (name, url) in &config.connector_webhooks {
            tracing::info!(connector = %name, url = %url, "Registered webhook connector");
            connectors.register(Arc::new(WebhookConnector::new(name.clone(), url.clone())));
        }

        let coordinator = Arc::new(Coordinator::new(
            config.coordinator.clone(),
            configurations.clone(),
            connectors,
            event_bus.clone(),
        ));

        Self {
            config: Arc::new(config),
            coordinator,
            configurations,
            event_bus,
        }
    }
}
