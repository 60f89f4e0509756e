//! Per-request tenant resolution.
//!
//! Runs before any handler: identifies the tenant, makes sure its store is registered, and
//! installs a fresh `TenantContext` in the request's extensions. The context lives and dies
//! with the request, so nothing leaks into the next request served by the same worker.

use crate::context::TenantContext;
use crate::error::AppError;
use crate::extractors::tenant::identify;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

/// Use with `axum::middleware::from_fn_with_state(state, tenant_context_layer)`.
pub async fn tenant_context_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = identify(req.headers(), state.jwt_key.as_ref())?;

    let mut ctx = TenantContext::unresolved();
    if let Some(identity) = identity {
        let alias = match identity.alias.as_deref() {
            Some(alias) if state.provisioner.registry().contains(alias) => alias.to_string(),
            claimed => {
                let key = identity.tenant_key()?;
                let ready = state.provisioner.ensure_alias_ready(&key).await?;
                if let Some(claimed) = claimed.filter(|c| *c != ready) {
                    tracing::warn!(tenant_key = %key, claimed = %claimed, alias = %ready, "token alias differs from provisioned alias");
                }
                ready
            }
        };
        ctx.set(Some(alias))?;
        req.extensions_mut().insert(identity);
    }
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}
