use std::collections::HashMap;

use async_trait::async_trait;
use caseflow_core::collaborators::ConfigurationStore;
use caseflow_core::error::CoreError;
use caseflow_core::run::{validate_configuration, RunConfiguration};
use tokio::sync::RwLock;

/// Configuration store kept in process memory.
#[derive(Default)]
pub struct InMemoryConfigurationStore {
    configurations: RwLock<HashMap<String, RunConfiguration>>,
}

impl InMemoryConfigurationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a configuration. Returns `true` if an existing
    /// configuration was replaced.
    pub async fn put(&self, id: impl Into<String>, config: RunConfiguration) -> Result<bool, CoreError> {
        validate_configuration(&config)?;
        Ok(self
            .configurations
            .write()
            .await
            .insert(id.into(), config)
            .is_some())
    }

    /// Stored configuration ids, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.configurations.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ConfigurationStore for InMemoryConfigurationStore {
    async fn get_configuration(&self, id: &str) -> Result<RunConfiguration, CoreError> {
        self.configurations
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("Configuration", id))
    }
}
