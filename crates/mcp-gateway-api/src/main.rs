//! MCP Gateway server

use anyhow::Context;
use mcp_admission_core::{connect_counter_store, AuthConfig, StaticCredentialStore};
use mcp_gateway_api::{create_router_with_state, AppState, GatewayConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = GatewayConfig::load().context("failed to load gateway configuration")?;
    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;

    let credential_store = load_credential_store(&config.auth)?;
    let counter_store = connect_counter_store(&config.rate_limit).await;
    let state = AppState::from_config(&config, Arc::new(credential_store), counter_store)
        .context("failed to build admission pipeline")?
        .with_metrics(metrics);
    let pipeline = Arc::clone(&state.pipeline);

    let app = create_router_with_state(state);
    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen))?;

    info!("MCP gateway listening on http://{}", config.server.listen);
    info!("Health check: http://{}/health", config.server.listen);

    // Run server with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    pipeline.close();
    info!("Server shutdown complete");

    Ok(())
}

/// `LOG_FORMAT=json` for JSON lines, compact text otherwise. `RUST_LOG` filters.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}

fn load_credential_store(auth: &AuthConfig) -> anyhow::Result<StaticCredentialStore> {
    let Some(path) = auth.keys_file.as_deref() else {
        warn!("no API key file configured, every authenticated request will be rejected");
        return Ok(StaticCredentialStore::new());
    };

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read API key file {}", path.display()))?;
    let store = StaticCredentialStore::from_json(&json)
        .with_context(|| format!("invalid API key file {}", path.display()))?;
    info!(keys = store.len(), path = %path.display(), "loaded API keys");
    Ok(store)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, starting graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting graceful shutdown..."),
    }
}
