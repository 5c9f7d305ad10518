//! Shared application state

use mcp_admission_core::{
    AdmissionPipeline, AuthConfig, BuildError, CounterStore, CredentialStore,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{GatewayConfig, ServerConfig};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AdmissionPipeline>,
    pub server: Arc<ServerConfig>,
    pub auth: Arc<AuthConfig>,
    /// Renders `/metrics`; absent when no recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    pub started_at: Instant,
}

impl AppState {
    /// Build the pipeline from configuration. Must run inside a tokio runtime.
    pub fn from_config(
        config: &GatewayConfig,
        credential_store: Arc<dyn CredentialStore>,
        counter_store: Option<Arc<dyn CounterStore>>,
    ) -> Result<Self, BuildError> {
        let mut builder = AdmissionPipeline::builder()
            .with_config(config.rate_limit.clone())
            .with_auth_config(config.auth.clone())
            .with_credential_store(credential_store);
        if let Some(store) = counter_store {
            builder = builder.with_counter_store(store);
        }

        Ok(Self {
            pipeline: Arc::new(builder.build()?),
            server: Arc::new(config.server.clone()),
            auth: Arc::new(config.auth.clone()),
            metrics: None,
            started_at: Instant::now(),
        })
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
