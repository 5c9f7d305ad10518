//! Terminal handlers for admitted requests.
//!
//! Tool routing, OAuth proxying and integration management run in
//! downstream services; the gateway answers with the identity it admitted.

use axum::{
    http::{HeaderMap, Method, Uri},
    response::IntoResponse,
    Extension, Json,
};
use mcp_admission_core::AuthContext;
use serde_json::json;
use std::sync::Arc;

use crate::middleware::AdmittedEndpoint;
use crate::response::{timestamp, REQUEST_ID_HEADER};

/// Protected API routes.
pub async fn admitted(
    Extension(auth): Extension<Arc<AuthContext>>,
    endpoint: Option<Extension<AdmittedEndpoint>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "data": {
            "admitted": true,
            "endpoint": endpoint.map(|Extension(AdmittedEndpoint(name))| name),
            "method": method.as_str(),
            "path": uri.path(),
            "tenantId": auth.tenant_id,
            "apiKeyId": auth.api_key_id,
        },
        "metadata": metadata(&headers),
    }))
}

/// GET /api/v1/auth/context
pub async fn auth_context(
    Extension(auth): Extension<Arc<AuthContext>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "data": auth.as_ref(),
        "metadata": metadata(&headers),
    }))
}

fn metadata(headers: &HeaderMap) -> serde_json::Value {
    json!({
        "timestamp": timestamp(),
        "requestId": headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()),
    })
}
