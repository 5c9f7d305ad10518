//! Identity types produced by authentication and consumed downstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const DEFAULT_REQUESTS_PER_SECOND: u32 = 10;
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 100;

/// Per-tenant rate limit carried on a credential.
///
/// Advisory only: the tenant limiter layer enforces the process-wide
/// `tenant_rps` from [`RateLimitConfig`](crate::RateLimitConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSettings {
    pub requests_per_second: u32,
    pub requests_per_minute: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
        }
    }
}

/// Descriptive metadata attached to an API key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Record returned by the credential store for a presented API key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitSettings>,
    #[serde(default)]
    pub metadata: Option<KeyMetadata>,
    /// SHA-256 hex digest of the raw key, as stored by the credential service.
    #[serde(default)]
    pub hashed_key: Option<String>,
}

/// Resolved identity and permissions of an authenticated request.
///
/// Built once per successful authentication and shared read-only
/// (behind an `Arc`) between the cache and the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub api_key_id: String,
    pub tenant_id: String,
    pub scopes: BTreeSet<String>,
    pub rate_limit: RateLimitSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<KeyMetadata>,
}

impl AuthContext {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// Scopes of `required` this context lacks, in the order given.
    pub fn missing_scopes<'a>(&self, required: &'a [String]) -> Vec<&'a String> {
        required.iter().filter(|s| !self.has_scope(s)).collect()
    }
}

impl From<CredentialRecord> for AuthContext {
    fn from(record: CredentialRecord) -> Self {
        Self {
            api_key_id: record.id,
            tenant_id: record.tenant_id,
            scopes: record.scopes.into_iter().collect(),
            rate_limit: record.rate_limit.unwrap_or_default(),
            metadata: record.metadata,
        }
    }
}

/// Request attributes the pipeline logs and keys decisions on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    pub client_ip: String,
}

impl RequestInfo {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        client_ip: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            client_ip: client_ip.into(),
        }
    }
}
