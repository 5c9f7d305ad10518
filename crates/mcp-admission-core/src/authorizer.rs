//! Tenant isolation and scope enforcement for authenticated requests.

use tracing::{debug, warn};

use crate::context::{AuthContext, RequestInfo};
use crate::error::AuthorizationError;

/// Keeps callers inside their own tenant.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantAuthorizer;

impl TenantAuthorizer {
    /// Allow the request if it names no tenant or names the caller's own.
    pub fn authorize_tenant(
        &self,
        auth: Option<&AuthContext>,
        requested_tenant_id: Option<&str>,
        request: &RequestInfo,
    ) -> Result<(), AuthorizationError> {
        let auth = auth.ok_or_else(|| deny(AuthorizationError::auth_required(&request.path)))?;

        let Some(requested) = requested_tenant_id else {
            debug!(
                path = %request.path,
                authenticated_tenant_id = %auth.tenant_id,
                "no tenant id in request, skipping tenant authorization"
            );
            return Ok(());
        };

        if requested != auth.tenant_id {
            warn!(
                authenticated_tenant_id = %auth.tenant_id,
                requested_tenant_id = %requested,
                path = %request.path,
                method = %request.method,
                ip = %request.client_ip,
                "tenant authorization failed - cross-tenant access attempt"
            );
            return Err(deny(AuthorizationError::cross_tenant(
                &auth.tenant_id,
                requested,
                &request.path,
            )));
        }

        debug!(tenant_id = %auth.tenant_id, path = %request.path, "tenant authorization succeeded");
        Ok(())
    }
}

/// Build a checker requiring every scope in `required`.
pub fn require_scopes<I, S>(required: I) -> ScopeRequirement
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ScopeRequirement {
        required: required.into_iter().map(Into::into).collect(),
    }
}

/// A set of scopes an endpoint demands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeRequirement {
    required: Vec<String>,
}

impl ScopeRequirement {
    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }

    pub fn check(
        &self,
        auth: Option<&AuthContext>,
        request: &RequestInfo,
    ) -> Result<(), AuthorizationError> {
        let auth = auth.ok_or_else(|| deny(AuthorizationError::auth_required(&request.path)))?;

        let missing: Vec<String> = auth
            .missing_scopes(&self.required)
            .into_iter()
            .cloned()
            .collect();

        if !missing.is_empty() {
            let user_scopes: Vec<String> = auth.scopes.iter().cloned().collect();
            warn!(
                tenant_id = %auth.tenant_id,
                user_scopes = ?user_scopes,
                required_scopes = ?self.required,
                missing_scopes = ?missing,
                path = %request.path,
                "scope authorization failed - missing required scopes"
            );
            return Err(deny(AuthorizationError::insufficient_scopes(
                &self.required,
                &user_scopes,
                &missing,
            )));
        }

        debug!(
            tenant_id = %auth.tenant_id,
            required_scopes = ?self.required,
            path = %request.path,
            "scope authorization succeeded"
        );
        Ok(())
    }
}

fn deny(err: AuthorizationError) -> AuthorizationError {
    metrics::counter!("gateway_authz_denials_total", "code" => err.code.as_str()).increment(1);
    err
}
