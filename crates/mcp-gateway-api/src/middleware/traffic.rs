//! Global and tenant rate limiting for every request.
//!
//! The body is buffered so the tenant named in a JSON payload can key the
//! tenant limiter; handlers still receive it unchanged.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use http_body_util::LengthLimitError;
use std::error::Error as _;
use tracing::warn;

use super::request::admission_request;
use crate::response::{rate_limited_response, ApiError, ResponseMeta};
use crate::state::AppState;

pub async fn traffic_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let meta = ResponseMeta::from_parts(&parts);

    // The body limit layer caps what this can read.
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) if exceeds_length_limit(&err) => {
            warn!(
                path = %meta.path,
                limit = state.server.body_limit_bytes,
                "request body too large"
            );
            return ApiError::payload_too_large(state.server.body_limit_bytes)
                .into_response_with(&meta);
        }
        Err(err) => {
            warn!(error = %err, path = %meta.path, "failed to read request body");
            return ApiError::invalid_body().into_response_with(&meta);
        }
    };

    let admission =
        admission_request(&mut parts, &bytes, state.server.trust_forwarded_for).await;
    if let Err(rejection) = state.pipeline.admit_traffic(&admission).await {
        return rate_limited_response(&rejection);
    }

    parts.extensions.insert(admission);
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

fn exceeds_length_limit(err: &axum::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if cause.is::<LengthLimitError>() {
            return true;
        }
        source = cause.source();
    }
    false
}
