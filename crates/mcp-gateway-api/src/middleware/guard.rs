//! Per-route admission: endpoint limit, authentication, authorization.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use mcp_admission_core::{AdmissionRequest, RoutePolicy};
use std::sync::Arc;
use tracing::debug;

use super::request::admission_request;
use crate::response::{admission_error_response, ResponseMeta};
use crate::state::AppState;

/// Endpoint name of the admitted route, for handlers.
#[derive(Debug, Clone)]
pub struct AdmittedEndpoint(pub String);

#[derive(Clone)]
pub struct RouteGuard {
    state: AppState,
    policy: Arc<RoutePolicy>,
}

impl RouteGuard {
    pub fn new(state: AppState, policy: RoutePolicy) -> Self {
        Self {
            state,
            policy: Arc::new(policy),
        }
    }
}

/// On success the caller's `Arc<AuthContext>` is added to request extensions.
pub async fn route_guard(
    State(guard): State<RouteGuard>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let meta = ResponseMeta::from_parts(&parts);

    let admission = match parts.extensions.remove::<AdmissionRequest>() {
        Some(admission) => admission,
        None => {
            debug!(path = %meta.path, "no traffic admission on request, reading head only");
            admission_request(&mut parts, &[], guard.state.server.trust_forwarded_for).await
        }
    };

    match guard.state.pipeline.admit_route(&admission, &guard.policy).await {
        Ok(auth) => {
            parts.extensions.insert(auth);
            if let Some(endpoint) = &guard.policy.endpoint {
                parts.extensions.insert(AdmittedEndpoint(endpoint.clone()));
            }
            next.run(Request::from_parts(parts, body)).await
        }
        Err(err) => admission_error_response(&err, &meta),
    }
}
