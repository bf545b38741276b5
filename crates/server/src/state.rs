//! Shared application state for the HTTP layer.

use std::sync::Arc;
use std::time::Duration;

use batchgate_core::{BatchOrchestrator, BatchProvider, BatchStore, Config, SanitizedConfig};

/// Application state shared across all handlers.
pub struct AppState {
    config: Config,
    orchestrator: Arc<BatchOrchestrator>,
    store: Arc<dyn BatchStore>,
    provider: Arc<dyn BatchProvider>,
}

impl AppState {
    pub fn new(
        config: Config,
        orchestrator: Arc<BatchOrchestrator>,
        store: Arc<dyn BatchStore>,
        provider: Arc<dyn BatchProvider>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            store,
            provider,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Config with secrets redacted, safe to return over HTTP.
    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn orchestrator(&self) -> &Arc<BatchOrchestrator> {
        &self.orchestrator
    }

    pub fn store(&self) -> &Arc<dyn BatchStore> {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn BatchProvider> {
        &self.provider
    }

    /// How long a chat request may wait for its result.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.server.request_timeout_secs)
    }
}
