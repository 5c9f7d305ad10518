//! Locating the tenant a request refers to.

use serde_json::Value;

/// Candidate tenant ids found on a request. Empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantSources {
    /// `:tenantId` path parameter.
    pub path: Option<String>,
    /// Top-level `tenantId` of a JSON body.
    pub body: Option<String>,
    /// `context.tenantId` of a JSON body.
    pub body_context: Option<String>,
    /// `tenantId` query parameter.
    pub query: Option<String>,
}

impl TenantSources {
    /// Pull `tenantId` and `context.tenantId` out of a JSON body.
    pub fn with_json_body(mut self, body: &Value) -> Self {
        self.body = string_field(body.get("tenantId"));
        self.body_context = string_field(body.get("context").and_then(|c| c.get("tenantId")));
        self
    }

    pub fn with_path(mut self, tenant_id: Option<String>) -> Self {
        self.path = non_empty(tenant_id);
        self
    }

    pub fn with_query(mut self, tenant_id: Option<String>) -> Self {
        self.query = non_empty(tenant_id);
        self
    }

    /// Tenant keying the limiter layers: body, body context, query, path.
    pub fn for_rate_limit(&self) -> Option<&str> {
        self.body
            .as_deref()
            .or(self.body_context.as_deref())
            .or(self.query.as_deref())
            .or(self.path.as_deref())
    }

    /// Tenant checked against the caller's own: path, body, query.
    pub fn for_authorization(&self) -> Option<&str> {
        self.path
            .as_deref()
            .or(self.body.as_deref())
            .or(self.query.as_deref())
    }
}

fn string_field(value: Option<&Value>) -> Option<String> {
    non_empty(value.and_then(Value::as_str).map(str::to_string))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_authorization_precedence() {
        let sources = TenantSources::default()
            .with_json_body(&json!({ "tenantId": "body" }))
            .with_query(Some("query".to_string()))
            .with_path(Some("path".to_string()));
        assert_eq!(sources.for_authorization(), Some("path"));

        let sources = TenantSources::default()
            .with_json_body(&json!({ "tenantId": "body" }))
            .with_query(Some("query".to_string()));
        assert_eq!(sources.for_authorization(), Some("body"));

        let sources = TenantSources::default().with_query(Some("query".to_string()));
        assert_eq!(sources.for_authorization(), Some("query"));
    }

    #[test]
    fn test_rate_limit_precedence() {
        let sources = TenantSources::default()
            .with_json_body(&json!({ "context": { "tenantId": "ctx" } }))
            .with_query(Some("query".to_string()))
            .with_path(Some("path".to_string()));
        assert_eq!(sources.for_rate_limit(), Some("ctx"));
        assert_eq!(sources.for_authorization(), Some("path"));
    }

    #[test]
    fn test_body_context_ignored_for_authorization() {
        let sources =
            TenantSources::default().with_json_body(&json!({ "context": { "tenantId": "ctx" } }));
        assert_eq!(sources.for_authorization(), None);
    }

    #[test]
    fn test_empty_and_non_string_values_are_absent() {
        let sources = TenantSources::default()
            .with_json_body(&json!({ "tenantId": "", "context": { "tenantId": 42 } }))
            .with_query(Some(String::new()));
        assert_eq!(sources.for_rate_limit(), None);
        assert_eq!(sources.for_authorization(), None);
    }
}
