//! Reading the admission inputs off an HTTP request.

use axum::{
    extract::{ConnectInfo, FromRequestParts, Query, RawPathParams},
    http::{header, request::Parts},
};
use mcp_admission_core::{AdmissionRequest, RequestInfo, TenantSources};
use std::collections::HashMap;
use std::net::SocketAddr;

const TENANT_ID: &str = "tenantId";
const UNKNOWN_IP: &str = "unknown";

/// Client address: the first `X-Forwarded-For` hop when trusted, else the
/// socket peer.
pub fn client_ip(parts: &Parts, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

/// Raw `Authorization` value. Non-UTF-8 bytes are replaced rather than
/// dropped so a garbled header fails as malformed, not missing.
pub fn authorization(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
}

/// Tenant ids from the matched path, the query string and a JSON body.
pub async fn tenant_sources(parts: &mut Parts, body: &[u8]) -> TenantSources {
    let path_tenant = RawPathParams::from_request_parts(parts, &())
        .await
        .ok()
        .and_then(|params| {
            params
                .iter()
                .find(|(name, _)| *name == TENANT_ID)
                .map(|(_, value)| value.to_string())
        });

    let query_tenant = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(mut query)| query.remove(TENANT_ID));

    let mut sources = TenantSources::default()
        .with_path(path_tenant)
        .with_query(query_tenant);
    if !body.is_empty() {
        if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
            sources = sources.with_json_body(&json);
        }
    }
    sources
}

/// Everything the pipeline needs, taken from the request head and body.
pub async fn admission_request(
    parts: &mut Parts,
    body: &[u8],
    trust_forwarded_for: bool,
) -> AdmissionRequest {
    let info = RequestInfo::new(
        parts.method.as_str(),
        parts.uri.path(),
        client_ip(parts, trust_forwarded_for),
    );
    let tenant = tenant_sources(parts, body).await;

    let mut request = AdmissionRequest::new(info).with_tenant(tenant);
    request.authorization = authorization(parts);
    request
}
