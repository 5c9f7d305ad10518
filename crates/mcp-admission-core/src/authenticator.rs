//! API key authentication.
//!
//! Validates the `Authorization: Bearer <key>` header, serves repeat keys
//! from the [`CredentialCache`] and falls back to the [`CredentialStore`]
//! on a miss.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cache::CredentialCache;
use crate::context::{AuthContext, RequestInfo};
use crate::credentials::CredentialStore;
use crate::error::{AuthenticationError, CredentialStoreError};

/// Shortest API key accepted before any lookup happens.
pub const MIN_API_KEY_LEN: usize = 32;

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ApiKeyAuthenticator {
    store: Arc<dyn CredentialStore>,
    cache: Arc<CredentialCache>,
    store_timeout: Duration,
}

impl ApiKeyAuthenticator {
    pub fn new(store: Arc<dyn CredentialStore>, cache: Arc<CredentialCache>) -> Self {
        Self {
            store,
            cache,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Bound each credential store call. A timeout fails authentication.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Authenticate a request from its raw `Authorization` header value.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        request: &RequestInfo,
    ) -> Result<Arc<AuthContext>, AuthenticationError> {
        let result = self.resolve(authorization, request).await;
        if let Err(err) = &result {
            warn!(
                error = %err,
                code = %err.code,
                path = %request.path,
                ip = %request.client_ip,
                "API key authentication failed"
            );
            metrics::counter!("gateway_auth_failures_total", "code" => err.code.as_str())
                .increment(1);
        }
        result
    }

    async fn resolve(
        &self,
        authorization: Option<&str>,
        request: &RequestInfo,
    ) -> Result<Arc<AuthContext>, AuthenticationError> {
        let header = authorization.ok_or_else(AuthenticationError::missing_header)?;
        let api_key = parse_bearer(header)?;

        if let Some(cached) = self.cache.get(api_key) {
            debug!(
                api_key_id = %cached.api_key_id,
                tenant_id = %cached.tenant_id,
                path = %request.path,
                "API key authentication succeeded (cached)"
            );
            return Ok(cached);
        }

        let auth_context = Arc::new(self.validate_api_key(api_key).await?);
        self.cache.put(api_key, Arc::clone(&auth_context));

        info!(
            api_key_id = %auth_context.api_key_id,
            tenant_id = %auth_context.tenant_id,
            path = %request.path,
            method = %request.method,
            "API key authentication succeeded"
        );
        Ok(auth_context)
    }

    /// Resolve a key against the credential store, bypassing the cache.
    pub async fn validate_api_key(&self, api_key: &str) -> Result<AuthContext, AuthenticationError> {
        let lookup = tokio::time::timeout(self.store_timeout, self.store.get_api_key(api_key))
            .await
            .unwrap_or(Err(CredentialStoreError::Timeout(self.store_timeout)));

        match lookup {
            Ok(Some(record)) => Ok(AuthContext::from(record)),
            Ok(None) => Err(AuthenticationError::invalid_key()),
            Err(err) => {
                error!(error = %err, "failed to validate API key");
                Err(AuthenticationError::validation_failed(err))
            }
        }
    }
}

/// Split a header into exactly `Bearer` and a key of acceptable length.
fn parse_bearer(header: &str) -> Result<&str, AuthenticationError> {
    let parts: Vec<&str> = header.split(' ').collect();
    let [scheme, key] = parts.as_slice() else {
        return Err(AuthenticationError::invalid_format());
    };
    if *scheme != "Bearer" {
        return Err(AuthenticationError::invalid_format());
    }
    if key.chars().count() < MIN_API_KEY_LEN {
        return Err(AuthenticationError::invalid_key_format(MIN_API_KEY_LEN));
    }
    Ok(*key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DEFAULT_CACHE_TTL;
    use crate::context::CredentialRecord;
    use crate::error::AuthErrorCode;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KEY: &str = "mcp_live_0123456789abcdef0123456789abcdef";

    #[derive(Default)]
    struct CountingStore {
        calls: AtomicUsize,
        fail: bool,
        hang: bool,
    }

    #[async_trait]
    impl CredentialStore for CountingStore {
        async fn get_api_key(
            &self,
            raw_key: &str,
        ) -> Result<Option<CredentialRecord>, CredentialStoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                return Err(CredentialStoreError::Unavailable("vault sealed".to_string()));
            }
            if raw_key != KEY {
                return Ok(None);
            }
            Ok(Some(CredentialRecord {
                id: "key-1".to_string(),
                tenant_id: "acme".to_string(),
                scopes: vec!["tools.invoke".to_string()],
                rate_limit: None,
                metadata: None,
                hashed_key: None,
            }))
        }

        async fn health_check(&self) -> bool {
            !self.fail
        }
    }

    fn authenticator(store: Arc<CountingStore>) -> ApiKeyAuthenticator {
        ApiKeyAuthenticator::new(store, Arc::new(CredentialCache::new(DEFAULT_CACHE_TTL)))
    }

    fn request() -> RequestInfo {
        RequestInfo::new("POST", "/api/v1/tools/select", "10.0.0.1")
    }

    fn bearer(key: &str) -> String {
        format!("Bearer {key}")
    }

    #[tokio::test]
    async fn test_missing_header() {
        let auth = authenticator(Arc::new(CountingStore::default()));
        let err = auth.authenticate(None, &request()).await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::MissingAuthHeader);
    }

    #[tokio::test]
    async fn test_invalid_format() {
        let auth = authenticator(Arc::new(CountingStore::default()));
        for header in [
            KEY.to_string(),
            format!("Basic {KEY}"),
            format!("bearer {KEY}"),
            format!("Bearer  {KEY}"),
            format!("Bearer {KEY} extra"),
        ] {
            let err = auth.authenticate(Some(&header), &request()).await.unwrap_err();
            assert_eq!(err.code, AuthErrorCode::InvalidAuthFormat, "header: {header}");
        }
    }

    #[tokio::test]
    async fn test_short_key_rejected_even_when_cached() {
        let store = Arc::new(CountingStore::default());
        let auth = authenticator(Arc::clone(&store));
        let short = "short";
        let ctx = Arc::new(auth.validate_api_key(KEY).await.unwrap());
        auth.cache().put(short, ctx);

        for header in [bearer(short), "Bearer ".to_string()] {
            let err = auth.authenticate(Some(&header), &request()).await.unwrap_err();
            assert_eq!(err.code, AuthErrorCode::InvalidApiKeyFormat);
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let auth = authenticator(Arc::new(CountingStore::default()));
        let other = "x".repeat(MIN_API_KEY_LEN);
        let err = auth.authenticate(Some(&bearer(&other)), &request()).await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::InvalidApiKey);
        assert!(auth.cache().get(&other).is_none());
    }

    #[tokio::test]
    async fn test_store_failure_wraps_cause() {
        let store = Arc::new(CountingStore {
            fail: true,
            ..Default::default()
        });
        let auth = authenticator(store);
        let err = auth.authenticate(Some(&bearer(KEY)), &request()).await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::ValidationFailed);
        assert!(err.source.unwrap().to_string().contains("vault sealed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_fails_closed() {
        let store = Arc::new(CountingStore {
            hang: true,
            ..Default::default()
        });
        let auth = authenticator(store).with_store_timeout(Duration::from_millis(100));
        let err = auth.authenticate(Some(&bearer(KEY)), &request()).await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::ValidationFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_call_served_from_cache() {
        let store = Arc::new(CountingStore::default());
        let auth = authenticator(Arc::clone(&store));

        let first = auth.authenticate(Some(&bearer(KEY)), &request()).await.unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        let second = auth.authenticate(Some(&bearer(KEY)), &request()).await.unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.tenant_id, "acme");
        assert_eq!(second.rate_limit.requests_per_second, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_queries_store_again() {
        let store = Arc::new(CountingStore::default());
        let auth = authenticator(Arc::clone(&store));

        auth.authenticate(Some(&bearer(KEY)), &request()).await.unwrap();
        tokio::time::advance(DEFAULT_CACHE_TTL + Duration::from_secs(1)).await;
        auth.authenticate(Some(&bearer(KEY)), &request()).await.unwrap();

        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }
}
