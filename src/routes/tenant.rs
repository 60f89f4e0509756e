//! Tenant routes. Admin routes sit outside the tenant middleware; tenant-scoped routes run behind it.

use crate::handlers::tenant::{current_tenant, lookup_name, refresh_tenant, register_tenant};
use crate::middleware::tenant_context_layer;
use crate::state::AppState;
use axum::{middleware::from_fn_with_state, routing::get, routing::post, Router};
use tower_http::limit::RequestBodyLimitLayer;

/// Admin request bodies are a couple of ids.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// POST /api/v1/tenants/register, POST /api/v1/tenants/refresh.
pub fn admin_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/tenants/register", post(register_tenant))
        .route("/api/v1/tenants/refresh", post(refresh_tenant))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

/// GET /api/v1/tenant/current, GET /api/v1/tenant/names/:kind/:id.
pub fn tenant_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/tenant/current", get(current_tenant))
        .route("/api/v1/tenant/names/:kind/:id", get(lookup_name))
        .route_layer(from_fn_with_state(state.clone(), tenant_context_layer))
        .with_state(state)
}

/// Every route of the service.
pub fn app_routes(state: AppState) -> Router {
    Router::new()
        .merge(super::common_routes(state.clone()))
        .merge(admin_routes(state.clone()))
        .merge(tenant_routes(state))
}
