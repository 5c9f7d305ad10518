//! Admission control: limiter layers, authentication and authorization in order.
//!
//! A request passes the global limiter (keyed by client IP), the tenant
//! limiter (keyed by the tenant the request names), then, once a route is
//! matched, the endpoint limiter, authentication, tenant isolation and
//! scope checks. The first layer that denies ends evaluation; later layers
//! are never charged.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::authenticator::ApiKeyAuthenticator;
use crate::authorizer::{ScopeRequirement, TenantAuthorizer};
use crate::cache::CredentialCache;
use crate::config::{AuthConfig, RateLimitConfig, MAX_WINDOW_MS};
use crate::context::{AuthContext, RequestInfo};
use crate::credentials::CredentialStore;
use crate::error::{AdmissionError, BuildError, RateLimitRejection};
use crate::ratelimit::{
    CounterMode, CounterStore, EndpointLimits, LocalCounterStore, RateLimitDecider,
    RateLimitScope,
};
use crate::tenant::TenantSources;

const ANONYMOUS: &str = "anonymous";

/// Everything the pipeline looks at on one request.
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub info: RequestInfo,
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
    pub tenant: TenantSources,
    pub received_at: DateTime<Utc>,
}

impl AdmissionRequest {
    pub fn new(info: RequestInfo) -> Self {
        Self {
            info,
            authorization: None,
            tenant: TenantSources::default(),
            received_at: Utc::now(),
        }
    }

    pub fn with_authorization(mut self, header: impl Into<String>) -> Self {
        self.authorization = Some(header.into());
        self
    }

    pub fn with_tenant(mut self, tenant: TenantSources) -> Self {
        self.tenant = tenant;
        self
    }

    pub fn at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }
}

/// What a matched route demands beyond the traffic layers.
#[derive(Debug, Clone, Default)]
pub struct RoutePolicy {
    /// Endpoint limiter to charge; `None` skips the endpoint layer.
    pub endpoint: Option<String>,
    /// Check the tenant named by the request against the caller's.
    pub authorize_tenant: bool,
    pub scopes: ScopeRequirement,
}

impl RoutePolicy {
    /// Authentication only.
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn endpoint(name: impl Into<String>) -> Self {
        Self {
            endpoint: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_tenant_check(mut self) -> Self {
        self.authorize_tenant = true;
        self
    }

    pub fn with_scopes(mut self, scopes: ScopeRequirement) -> Self {
        self.scopes = scopes;
        self
    }
}

/// Readiness of the pipeline's collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub credential_store: bool,
    pub counter_store: bool,
    pub counter_mode: CounterMode,
}

impl Readiness {
    /// Only the credential store gates readiness; counting degrades to local.
    pub fn is_ready(&self) -> bool {
        self.credential_store
    }
}

pub struct AdmissionPipeline {
    config: RateLimitConfig,
    endpoint_limits: EndpointLimits,
    decider: RateLimitDecider,
    authenticator: ApiKeyAuthenticator,
    authorizer: TenantAuthorizer,
}

impl AdmissionPipeline {
    pub fn builder() -> AdmissionPipelineBuilder {
        AdmissionPipelineBuilder::new()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn endpoint_limits(&self) -> &EndpointLimits {
        &self.endpoint_limits
    }

    pub fn decider(&self) -> &RateLimitDecider {
        &self.decider
    }

    pub fn authenticator(&self) -> &ApiKeyAuthenticator {
        &self.authenticator
    }

    pub fn counter_mode(&self) -> CounterMode {
        self.decider.mode()
    }

    /// Global and tenant layers; run before route matching.
    pub async fn admit_traffic(&self, req: &AdmissionRequest) -> Result<(), RateLimitRejection> {
        self.check_global(req).await?;
        self.check_tenant(req).await
    }

    /// Endpoint layer, authentication and authorization for a matched route.
    pub async fn admit_route(
        &self,
        req: &AdmissionRequest,
        policy: &RoutePolicy,
    ) -> Result<Arc<AuthContext>, AdmissionError> {
        if let Some(endpoint) = policy.endpoint.as_deref() {
            self.check_endpoint(req, endpoint).await?;
        }

        let auth = self
            .authenticator
            .authenticate(req.authorization.as_deref(), &req.info)
            .await?;

        if policy.authorize_tenant {
            self.authorizer.authorize_tenant(
                Some(&*auth),
                req.tenant.for_authorization(),
                &req.info,
            )?;
        }
        if !policy.scopes.is_empty() {
            policy.scopes.check(Some(&*auth), &req.info)?;
        }

        Ok(auth)
    }

    /// Every layer in order.
    pub async fn admit(
        &self,
        req: &AdmissionRequest,
        policy: &RoutePolicy,
    ) -> Result<Arc<AuthContext>, AdmissionError> {
        self.admit_traffic(req).await?;
        self.admit_route(req, policy).await
    }

    /// Per-IP limit over all non-exempt traffic.
    pub async fn check_global(&self, req: &AdmissionRequest) -> Result<(), RateLimitRejection> {
        if !self.config.global_enabled || self.config.is_exempt(&req.info.path) {
            return Ok(());
        }
        self.enforce(
            RateLimitScope::Global,
            &req.info.client_ip,
            self.config.global_rps,
            self.config.global_window(),
            req,
        )
        .await
    }

    /// Per-tenant limit; skipped when the request names no tenant.
    pub async fn check_tenant(&self, req: &AdmissionRequest) -> Result<(), RateLimitRejection> {
        if !self.config.tenant_enabled || self.config.is_exempt(&req.info.path) {
            return Ok(());
        }
        let Some(tenant_id) = req.tenant.for_rate_limit() else {
            return Ok(());
        };
        self.enforce(
            RateLimitScope::Tenant,
            tenant_id,
            self.config.tenant_rps,
            self.config.tenant_window(),
            req,
        )
        .await
    }

    /// Per-endpoint limit for the caller's tenant, or `anonymous`.
    pub async fn check_endpoint(
        &self,
        req: &AdmissionRequest,
        endpoint: &str,
    ) -> Result<(), RateLimitRejection> {
        if !self.config.endpoint_limits_enabled {
            return Ok(());
        }
        let Some(limit) = self.endpoint_limits.get(endpoint) else {
            debug!(endpoint, "no rate limit configured for endpoint");
            return Ok(());
        };

        let identity = format!(
            "{}:{}",
            endpoint,
            req.tenant.for_rate_limit().unwrap_or(ANONYMOUS)
        );
        self.enforce(
            RateLimitScope::Endpoint(endpoint.to_string()),
            &identity,
            limit.max_requests(),
            limit.window,
            req,
        )
        .await
    }

    async fn enforce(
        &self,
        scope: RateLimitScope,
        identity: &str,
        limit: u64,
        window: Duration,
        req: &AdmissionRequest,
    ) -> Result<(), RateLimitRejection> {
        let decision = self
            .decider
            .decide(&scope, identity, limit, window, req.received_at)
            .await;

        metrics::counter!(
            "gateway_rate_limit_decisions_total",
            "scope" => scope.kind(),
            "allowed" => if decision.allowed { "true" } else { "false" }
        )
        .increment(1);

        if decision.allowed {
            return Ok(());
        }

        warn!(
            scope = %scope,
            identity,
            limit,
            count = decision.count,
            path = %req.info.path,
            method = %req.info.method,
            ip = %req.info.client_ip,
            "rate limit exceeded"
        );
        Err(RateLimitRejection {
            scope,
            identity: identity.to_string(),
            limit,
            count: decision.count,
            window,
            reset_time: decision.reset_time,
            decided_at: req.received_at,
        })
    }

    pub async fn readiness(&self) -> Readiness {
        Readiness {
            credential_store: self.authenticator.store().health_check().await,
            counter_store: self.decider.health_check().await,
            counter_mode: self.decider.mode(),
        }
    }

    /// Stop background work and release cached credentials.
    pub fn close(&self) {
        self.authenticator.cache().close();
        info!("admission pipeline closed");
    }
}

impl std::fmt::Debug for AdmissionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPipeline")
            .field("config", &self.config)
            .field("decider", &self.decider)
            .finish_non_exhaustive()
    }
}

/// Builder for [`AdmissionPipeline`].
pub struct AdmissionPipelineBuilder {
    rate_limit: RateLimitConfig,
    auth: AuthConfig,
    credential_store: Option<Arc<dyn CredentialStore>>,
    counter_store: Option<Arc<dyn CounterStore>>,
}

impl AdmissionPipelineBuilder {
    pub fn new() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            auth: AuthConfig::default(),
            credential_store: None,
            counter_store: None,
        }
    }

    pub fn with_config(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    pub fn with_auth_config(mut self, config: AuthConfig) -> Self {
        self.auth = config;
        self
    }

    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    /// Distributed counters. Without one, counting is local to this process.
    pub fn with_counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.counter_store = Some(store);
        self
    }

    /// Assemble the pipeline. Spawns the credential cache sweeper, so this
    /// must run inside a tokio runtime.
    pub fn build(self) -> Result<AdmissionPipeline, BuildError> {
        let store = self
            .credential_store
            .ok_or(BuildError::MissingCredentialStore)?;
        validate(&self.rate_limit)?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BuildError::NoRuntime);
        }

        let local = Arc::new(LocalCounterStore::new(self.rate_limit.local_max_windows));
        let decider = match self.counter_store {
            Some(distributed) => RateLimitDecider::distributed(distributed, local),
            None => RateLimitDecider::local(local),
        }
        .with_key_prefix(self.rate_limit.key_prefix.clone())
        .with_call_timeout(self.rate_limit.store_timeout())
        .with_degraded_cooldown(self.rate_limit.degraded_cooldown());

        let cache = CredentialCache::start(self.auth.cache_ttl(), self.auth.sweep_interval());
        let authenticator =
            ApiKeyAuthenticator::new(store, cache).with_store_timeout(self.auth.store_timeout());

        info!(
            global_enabled = self.rate_limit.global_enabled,
            global_rps = self.rate_limit.global_rps,
            tenant_enabled = self.rate_limit.tenant_enabled,
            tenant_rps = self.rate_limit.tenant_rps,
            endpoint_limits_enabled = self.rate_limit.endpoint_limits_enabled,
            mode = %decider.mode(),
            "admission pipeline initialized"
        );

        Ok(AdmissionPipeline {
            endpoint_limits: self.rate_limit.endpoint_limits(),
            config: self.rate_limit,
            decider,
            authenticator,
            authorizer: TenantAuthorizer,
        })
    }
}

impl Default for AdmissionPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(config: &RateLimitConfig) -> Result<(), BuildError> {
    if config.global_enabled && config.global_rps == 0 {
        return Err(BuildError::InvalidConfig(
            "global_rps must be positive when the global limiter is enabled".to_string(),
        ));
    }
    if config.tenant_enabled && config.tenant_rps == 0 {
        return Err(BuildError::InvalidConfig(
            "tenant_rps must be positive when the tenant limiter is enabled".to_string(),
        ));
    }
    for (field, window_ms) in [
        ("global_window_ms", config.global_window_ms),
        ("tenant_window_ms", config.tenant_window_ms),
    ] {
        if !window_in_range(window_ms) {
            return Err(BuildError::InvalidConfig(format!(
                "{field} must be between 1 and {MAX_WINDOW_MS}, got {window_ms}"
            )));
        }
    }
    if let Some((name, _)) = config.endpoints.iter().find(|(_, limit)| {
        !limit.requests_per_second.is_finite()
            || limit.requests_per_second <= 0.0
            || !window_in_range(limit.window_ms)
    }) {
        return Err(BuildError::InvalidConfig(format!(
            "endpoint limit {name} needs a positive rate and a window of at most {MAX_WINDOW_MS} ms"
        )));
    }
    Ok(())
}

fn window_in_range(window_ms: u64) -> bool {
    (1..=MAX_WINDOW_MS).contains(&window_ms)
}
