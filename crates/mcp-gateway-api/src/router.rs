//! Route configuration

use axum::{
    middleware,
    routing::{delete, get, post, MethodRouter},
    Router,
};
use mcp_admission_core::ratelimit::endpoints::{
    INTEGRATIONS_LIST, OAUTH_CONFIG_DELETE, OAUTH_CONFIG_GET, OAUTH_CONFIG_POST, TOOLS_INVOKE,
    TOOLS_LIST, TOOLS_SELECT,
};
use mcp_admission_core::RoutePolicy;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::handlers;
use crate::middleware::{
    handle_panic, recover_internal_errors, route_guard, traffic_middleware, RouteGuard,
};
use crate::state::AppState;

/// Create the application router with state
///
/// Every route passes the traffic layer (global and tenant limits, exempt
/// paths excepted). API routes are additionally guarded by a per-route
/// [`RoutePolicy`]: endpoint limit, API key, tenant check, scopes.
///
/// ## Routes
/// - GET / - Service descriptor
/// - GET /health - Liveness
/// - GET /ready - Readiness (credential store, counter store)
/// - GET /metrics - Prometheus metrics
/// - POST /api/v1/tools/select
/// - POST /api/v1/tools/invoke
/// - GET /api/v1/tools/list
/// - GET /api/v1/categories
/// - POST|GET|DELETE /api/v1/tenants/:tenantId/integrations/:integration/oauth-config
/// - GET /api/v1/tenants/:tenantId/integrations
/// - GET /api/v1/auth/context
pub fn create_router_with_state(state: AppState) -> Router {
    let guarded = |handler: MethodRouter<AppState>, policy: RoutePolicy| {
        handler.route_layer(middleware::from_fn_with_state(
            RouteGuard::new(state.clone(), policy),
            route_guard,
        ))
    };
    let endpoint = |name: &str| RoutePolicy::endpoint(name).with_scopes(state.auth.scopes_for(name));
    let authenticated = |name: &str| RoutePolicy::authenticated().with_scopes(state.auth.scopes_for(name));

    let api = Router::new()
        .route(
            "/api/v1/tools/select",
            guarded(post(handlers::admitted), endpoint(TOOLS_SELECT)),
        )
        .route(
            "/api/v1/tools/invoke",
            guarded(post(handlers::admitted), endpoint(TOOLS_INVOKE).with_tenant_check()),
        )
        .route(
            "/api/v1/tools/list",
            guarded(get(handlers::admitted), endpoint(TOOLS_LIST)),
        )
        .route(
            "/api/v1/categories",
            guarded(get(handlers::admitted), authenticated("categories")),
        )
        .route(
            "/api/v1/tenants/:tenantId/integrations/:integration/oauth-config",
            guarded(post(handlers::admitted), endpoint(OAUTH_CONFIG_POST).with_tenant_check())
                .merge(guarded(
                    get(handlers::admitted),
                    endpoint(OAUTH_CONFIG_GET).with_tenant_check(),
                ))
                .merge(guarded(
                    delete(handlers::admitted),
                    endpoint(OAUTH_CONFIG_DELETE).with_tenant_check(),
                )),
        )
        .route(
            "/api/v1/tenants/:tenantId/integrations",
            guarded(get(handlers::admitted), endpoint(INTEGRATIONS_LIST).with_tenant_check()),
        )
        .route(
            "/api/v1/auth/context",
            guarded(get(handlers::auth_context), authenticated("auth-context")),
        );

    let body_limit = state.server.body_limit_bytes;

    let router = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics))
        .merge(api)
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(state.clone(), traffic_middleware))
        .with_state(state);

    with_http_layers(router, body_limit)
}

/// Request id, tracing, panic recovery and the body size limit.
fn with_http_layers(router: Router, body_limit: usize) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(middleware::from_fn(recover_internal_errors))
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(RequestBodyLimitLayer::new(body_limit)),
    )
}
