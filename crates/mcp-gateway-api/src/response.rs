//! Response envelopes
//!
//! Errors other than rate limiting share one shape:
//! `{success: false, error: {code, message, type?, context?}, metadata: {timestamp, requestId?, path}}`.
//! Rate limit denials use their own body and carry `Retry-After` and
//! `RateLimit-*` headers.

use axum::{
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use mcp_admission_core::{AdmissionError, AuthenticationError, AuthorizationError, RateLimitRejection};
use serde_json::{json, Value};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request details echoed in every error body.
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    pub path: String,
    pub request_id: Option<String>,
}

impl ResponseMeta {
    pub fn new(path: impl Into<String>, headers: &HeaderMap) -> Self {
        Self {
            path: path.into(),
            request_id: headers
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }

    pub fn from_parts(parts: &Parts) -> Self {
        Self::new(parts.uri.path(), &parts.headers)
    }

    fn to_json(&self) -> Value {
        let mut metadata = json!({
            "timestamp": timestamp(),
            "path": self.path,
        });
        if let Some(id) = &self.request_id {
            metadata["requestId"] = json!(id);
        }
        metadata
    }
}

/// An error rendered with the standard envelope.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub kind: Option<&'static str>,
    pub context: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            kind: None,
            context: None,
        }
    }

    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "An unexpected error occurred during request processing.",
        )
    }

    pub fn not_found(path: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "ROUTE_NOT_FOUND",
            format!("Route {path} not found"),
        )
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "PAYLOAD_TOO_LARGE",
            format!("Request body exceeds the {limit} byte limit"),
        )
    }

    pub fn invalid_body() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "INVALID_REQUEST_BODY",
            "Request body could not be read",
        )
    }

    pub fn not_ready() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_NOT_READY",
            "Gateway dependencies are not ready",
        )
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn into_response_with(self, meta: &ResponseMeta) -> Response {
        let mut error = json!({
            "code": self.code,
            "message": self.message,
        });
        if let Some(kind) = self.kind {
            error["type"] = json!(kind);
        }
        if let Some(context) = self.context {
            error["context"] = context;
        }

        (
            self.status,
            Json(json!({
                "success": false,
                "error": error,
                "metadata": meta.to_json(),
            })),
        )
            .into_response()
    }
}

impl From<&AuthenticationError> for ApiError {
    fn from(err: &AuthenticationError) -> Self {
        Self {
            kind: Some("AuthenticationError"),
            ..Self::new(StatusCode::UNAUTHORIZED, err.code.as_str(), err.message.clone())
        }
    }
}

impl From<&AuthorizationError> for ApiError {
    fn from(err: &AuthorizationError) -> Self {
        Self {
            kind: Some("AuthorizationError"),
            context: Some(err.context.clone()),
            ..Self::new(StatusCode::FORBIDDEN, err.code.as_str(), err.message.clone())
        }
    }
}

/// Render any pipeline denial.
pub fn admission_error_response(err: &AdmissionError, meta: &ResponseMeta) -> Response {
    match err {
        AdmissionError::RateLimited(rejection) => rate_limited_response(rejection),
        AdmissionError::Authentication(err) => ApiError::from(err).into_response_with(meta),
        AdmissionError::Authorization(err) => ApiError::from(err).into_response_with(meta),
    }
}

/// 429 with the limiter details and standard rate limit headers.
pub fn rate_limited_response(rejection: &RateLimitRejection) -> Response {
    let retry_after = rejection.retry_after_secs();
    let body = json!({
        "error": "Rate Limit Exceeded",
        "message": "Too many requests. Please try again later.",
        "retryAfter": retry_after,
        "limits": {
            "scope": rejection.scope,
            "limit": rejection.limit,
            "window": rejection.window_label(),
            "remaining": 0,
            "resetAt": rejection.reset_time.to_rfc3339_opts(SecondsFormat::Millis, true),
        },
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    headers.insert(
        HeaderName::from_static("ratelimit-limit"),
        HeaderValue::from(rejection.limit),
    );
    headers.insert(
        HeaderName::from_static("ratelimit-remaining"),
        HeaderValue::from_static("0"),
    );
    headers.insert(
        HeaderName::from_static("ratelimit-reset"),
        HeaderValue::from(retry_after),
    );
    response
}

pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use mcp_admission_core::RateLimitScope;
    use std::time::Duration;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn meta() -> ResponseMeta {
        ResponseMeta {
            path: "/api/v1/tools/list".to_string(),
            request_id: Some("req-1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_authentication_envelope() {
        let err = AdmissionError::from(AuthenticationError::missing_header());
        let response = admission_error_response(&err, &meta());
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "MISSING_AUTH_HEADER");
        assert_eq!(body["error"]["type"], "AuthenticationError");
        assert!(body["error"].get("context").is_none());
        assert_eq!(body["metadata"]["path"], "/api/v1/tools/list");
        assert_eq!(body["metadata"]["requestId"], "req-1");
        assert!(body["metadata"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_authorization_envelope_has_context() {
        let err = AdmissionError::from(AuthorizationError::cross_tenant("acme", "globex", "/x"));
        let response = admission_error_response(&err, &meta());
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "CROSS_TENANT_ACCESS_DENIED");
        assert_eq!(body["error"]["type"], "AuthorizationError");
        assert_eq!(body["error"]["context"]["authenticatedTenantId"], "acme");
    }

    #[tokio::test]
    async fn test_internal_error_has_no_detail() {
        let response = ApiError::internal().into_response_with(&ResponseMeta::default());
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert!(body["metadata"].get("requestId").is_none());
    }

    #[tokio::test]
    async fn test_rate_limited_body_and_headers() {
        let now = Utc::now();
        let rejection = RateLimitRejection {
            scope: RateLimitScope::Endpoint("tools-select".to_string()),
            identity: "tools-select:acme".to_string(),
            limit: 600,
            count: 601,
            window: Duration::from_secs(60),
            reset_time: now + chrono::Duration::milliseconds(12_500),
            decided_at: now,
        };
        let response = rate_limited_response(&rejection);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "13");
        assert_eq!(response.headers()["ratelimit-limit"], "600");
        assert_eq!(response.headers()["ratelimit-remaining"], "0");

        let body = body_json(response).await;
        assert_eq!(body["error"], "Rate Limit Exceeded");
        assert_eq!(body["retryAfter"], 13);
        assert_eq!(body["limits"]["scope"], "endpoint:tools-select");
        assert_eq!(body["limits"]["window"], "1 minute");
        assert_eq!(body["limits"]["remaining"], 0);
        assert!(body["limits"]["resetAt"].as_str().unwrap().ends_with('Z'));
    }
}
