//! Infrastructure endpoints: liveness, readiness, metrics, service descriptor.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::response::{timestamp, ApiError, ResponseMeta};
use crate::state::AppState;

const SERVICE_NAME: &str = "mcp-gateway";

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": timestamp(),
        "uptime": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /ready
///
/// 503 when the credential store is unhealthy. A failing counter store
/// only changes the reported mode; limiting continues locally.
pub async fn ready(State(state): State<AppState>, uri: Uri, headers: HeaderMap) -> Response {
    let readiness = state.pipeline.readiness().await;
    let checks = json!({
        "credentialStore": readiness.credential_store,
        "counterStore": readiness.counter_store,
        "counterMode": readiness.counter_mode,
    });

    if !readiness.is_ready() {
        return ApiError::not_ready()
            .with_context(checks)
            .into_response_with(&ResponseMeta::new(uri.path(), &headers));
    }

    Json(json!({
        "status": "ready",
        "timestamp": timestamp(),
        "checks": checks,
    }))
    .into_response()
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Response {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

/// GET /
pub async fn root() -> impl IntoResponse {
    Json(json!({
        "name": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "ready": "/ready",
            "metrics": "/metrics",
            "tools": "/api/v1/tools",
            "tenants": "/api/v1/tenants/:tenantId/integrations",
            "authContext": "/api/v1/auth/context",
        },
    }))
}

/// Fallback for unmatched routes.
pub async fn not_found(uri: Uri, headers: HeaderMap) -> Response {
    ApiError::not_found(uri.path()).into_response_with(&ResponseMeta::new(uri.path(), &headers))
}
