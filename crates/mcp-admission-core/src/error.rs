//! Error types for the admission pipeline.
//!
//! Each stage owns one error type; [`AdmissionError`] unifies them for
//! callers that drive the whole pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::ratelimit::RateLimitScope;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Machine-readable reason for an authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthErrorCode {
    MissingAuthHeader,
    InvalidAuthFormat,
    InvalidApiKeyFormat,
    InvalidApiKey,
    ValidationFailed,
}

impl AuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingAuthHeader => "MISSING_AUTH_HEADER",
            Self::InvalidAuthFormat => "INVALID_AUTH_FORMAT",
            Self::InvalidApiKeyFormat => "INVALID_API_KEY_FORMAT",
            Self::InvalidApiKey => "INVALID_API_KEY",
            Self::ValidationFailed => "VALIDATION_FAILED",
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The presented credentials could not be turned into an [`AuthContext`](crate::AuthContext).
///
/// Always surfaces as HTTP 401.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct AuthenticationError {
    pub code: AuthErrorCode,
    pub message: String,
    #[source]
    pub source: Option<BoxError>,
}

impl AuthenticationError {
    pub fn new(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn missing_header() -> Self {
        Self::new(
            AuthErrorCode::MissingAuthHeader,
            "Missing Authorization header. Please provide an API key using: Authorization: Bearer <api-key>",
        )
    }

    pub fn invalid_format() -> Self {
        Self::new(
            AuthErrorCode::InvalidAuthFormat,
            "Invalid Authorization header format. Expected: Authorization: Bearer <api-key>",
        )
    }

    pub fn invalid_key_format(min_len: usize) -> Self {
        Self::new(
            AuthErrorCode::InvalidApiKeyFormat,
            format!("Invalid API key format. API keys must be at least {min_len} characters long."),
        )
    }

    pub fn invalid_key() -> Self {
        Self::new(
            AuthErrorCode::InvalidApiKey,
            "Invalid API key. Please check your credentials or generate a new API key.",
        )
    }

    pub fn validation_failed(cause: impl Into<BoxError>) -> Self {
        Self::new(
            AuthErrorCode::ValidationFailed,
            "Failed to validate API key. Please try again or contact support.",
        )
        .with_source(cause)
    }
}

/// Machine-readable reason for an authorization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthzErrorCode {
    AuthRequired,
    CrossTenantAccessDenied,
    InsufficientScopes,
}

impl AuthzErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::CrossTenantAccessDenied => "CROSS_TENANT_ACCESS_DENIED",
            Self::InsufficientScopes => "INSUFFICIENT_SCOPES",
        }
    }
}

impl fmt::Display for AuthzErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated caller may not perform the request. Surfaces as HTTP 403.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct AuthorizationError {
    pub code: AuthzErrorCode,
    pub message: String,
    /// Structured detail echoed in the response body.
    pub context: serde_json::Value,
}

impl AuthorizationError {
    pub fn auth_required(path: &str) -> Self {
        Self {
            code: AuthzErrorCode::AuthRequired,
            message: "Authentication required. This endpoint requires a valid API key."
                .to_string(),
            context: serde_json::json!({ "path": path }),
        }
    }

    pub fn cross_tenant(authenticated: &str, requested: &str, path: &str) -> Self {
        Self {
            code: AuthzErrorCode::CrossTenantAccessDenied,
            message: format!(
                "Access denied. You do not have permission to access resources for tenant: {requested}"
            ),
            context: serde_json::json!({
                "authenticatedTenantId": authenticated,
                "requestedTenantId": requested,
                "path": path,
            }),
        }
    }

    pub fn insufficient_scopes(required: &[String], user: &[String], missing: &[String]) -> Self {
        Self {
            code: AuthzErrorCode::InsufficientScopes,
            message: format!(
                "Access denied. Missing required scopes: {}",
                missing.join(", ")
            ),
            context: serde_json::json!({
                "requiredScopes": required,
                "userScopes": user,
                "missingScopes": missing,
            }),
        }
    }
}

/// A limiter layer denied the request. Surfaces as HTTP 429.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("rate limit exceeded for scope {scope}: {count}/{limit}")]
pub struct RateLimitRejection {
    pub scope: RateLimitScope,
    pub identity: String,
    pub limit: u64,
    pub count: u64,
    pub window: Duration,
    pub reset_time: DateTime<Utc>,
    /// Instant the decision was taken; `retry_after` is measured from here.
    pub decided_at: DateTime<Utc>,
}

impl RateLimitRejection {
    /// Whole seconds until the window resets, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        let millis = (self.reset_time - self.decided_at).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000)
    }

    /// Human label for the window, as reported in the 429 body.
    pub fn window_label(&self) -> String {
        match self.window.as_millis() {
            1_000 => "1 second".to_string(),
            60_000 => "1 minute".to_string(),
            ms if ms % 60_000 == 0 => format!("{} minutes", ms / 60_000),
            ms if ms % 1_000 == 0 => format!("{} seconds", ms / 1_000),
            ms => format!("{ms} milliseconds"),
        }
    }
}

/// Failure talking to the external credential store.
#[derive(Debug, thiserror::Error)]
pub enum CredentialStoreError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),

    #[error("credential store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("malformed credential record: {0}")]
    Malformed(String),
}

/// Failure talking to a counter store.
#[derive(Debug, thiserror::Error)]
pub enum CounterStoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    #[error("counter store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("unexpected counter store reply: {0}")]
    Protocol(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CounterStoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Protocol(err.to_string())
        }
    }
}

/// Any stage of the admission pipeline denied the request.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error(transparent)]
    RateLimited(#[from] RateLimitRejection),

    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
}

/// The pipeline could not be assembled.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no credential store configured")]
    MissingCredentialStore,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The credential cache sweeper needs a running tokio runtime.
    #[error("admission pipeline must be built inside a tokio runtime")]
    NoRuntime,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejection(window_secs: u64, reset_in_ms: i64) -> RateLimitRejection {
        let now = Utc::now();
        RateLimitRejection {
            scope: RateLimitScope::Global,
            identity: "10.0.0.1".to_string(),
            limit: 5,
            count: 6,
            window: Duration::from_secs(window_secs),
            reset_time: now + chrono::Duration::milliseconds(reset_in_ms),
            decided_at: now,
        }
    }

    #[test]
    fn test_auth_code_strings() {
        assert_eq!(AuthErrorCode::MissingAuthHeader.as_str(), "MISSING_AUTH_HEADER");
        assert_eq!(AuthErrorCode::InvalidApiKeyFormat.to_string(), "INVALID_API_KEY_FORMAT");
        assert_eq!(
            serde_json::to_string(&AuthErrorCode::ValidationFailed).unwrap(),
            "\"VALIDATION_FAILED\""
        );
        assert_eq!(
            serde_json::to_string(&AuthzErrorCode::CrossTenantAccessDenied).unwrap(),
            "\"CROSS_TENANT_ACCESS_DENIED\""
        );
    }

    #[test]
    fn test_validation_failed_keeps_cause() {
        let err = AuthenticationError::validation_failed(CredentialStoreError::Unavailable(
            "connection refused".to_string(),
        ));
        assert_eq!(err.code, AuthErrorCode::ValidationFailed);
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("connection refused"));
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(rejection(60, 1).retry_after_secs(), 1);
        assert_eq!(rejection(60, 1000).retry_after_secs(), 1);
        assert_eq!(rejection(60, 1001).retry_after_secs(), 2);
        assert_eq!(rejection(60, -50).retry_after_secs(), 0);
    }

    #[test]
    fn test_window_labels() {
        assert_eq!(rejection(1, 0).window_label(), "1 second");
        assert_eq!(rejection(60, 0).window_label(), "1 minute");
        assert_eq!(rejection(300, 0).window_label(), "5 minutes");
        assert_eq!(rejection(10, 0).window_label(), "10 seconds");
    }

    #[test]
    fn test_window_labels_keep_sub_second_precision() {
        let label = |millis| {
            RateLimitRejection {
                window: Duration::from_millis(millis),
                ..rejection(1, 0)
            }
            .window_label()
        };
        assert_eq!(label(1_500), "1500 milliseconds");
        assert_eq!(label(250), "250 milliseconds");
        assert_eq!(label(90_000), "90 seconds");
        assert_eq!(label(120_000), "2 minutes");
    }

    #[test]
    fn test_insufficient_scopes_context() {
        let err = AuthorizationError::insufficient_scopes(
            &["admin".to_string(), "users.write".to_string()],
            &["admin".to_string()],
            &["users.write".to_string()],
        );
        assert_eq!(err.code, AuthzErrorCode::InsufficientScopes);
        assert_eq!(err.context["missingScopes"], serde_json::json!(["users.write"]));
        assert!(err.message.ends_with("users.write"));
    }
}
