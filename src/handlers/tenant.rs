//! Tenant endpoints: internal register/refresh, current tenant, and name lookups.

use crate::context::TenantContext;
use crate::error::{AppError, TenancyError};
use crate::resolver::INTERNAL_TOKEN_HEADER;
use crate::response::{success_one, success_one_ok};
use crate::router::ModelClass;
use crate::state::AppState;
use crate::tenant::TenantKey;
use axum::extract::{Path, State};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;

#[derive(Debug, Default, Deserialize)]
pub struct RegisterBody {
    /// Number or numeric string.
    #[serde(default)]
    pub client_id: Option<Value>,
    #[serde(default)]
    pub client_username: Option<String>,
}

impl RegisterBody {
    /// `client_id` wins over `client_username` whenever it is present.
    pub fn tenant_key(&self) -> Result<TenantKey, AppError> {
        match &self.client_id {
            Some(Value::Null) | None => {}
            Some(v) => {
                let id = match v {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                };
                return id
                    .map(TenantKey::ClientId)
                    .ok_or_else(|| AppError::BadRequest(format!("client_id must be numeric, got {}", v)));
            }
        }
        match self.client_username.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Ok(TenantKey::Username(name.to_string())),
            _ => Err(AppError::BadRequest("Provide client_id or client_username.".into())),
        }
    }
}

/// Admin endpoints are open when no internal token is configured.
fn check_internal_token(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = state.config.internal_token.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get(INTERNAL_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(AppError::Unauthorized(format!("missing or invalid {}", INTERNAL_TOKEN_HEADER)))
    }
}

/// POST /api/v1/tenants/register: provision (if needed) and return the tenant's alias.
pub async fn register_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse, AppError> {
    check_internal_token(&state, &headers)?;
    let key = body.tenant_key()?;
    let alias = state.provisioner.ensure_alias_ready(&key).await?;
    Ok(success_one(json!({ "detail": "Alias ready", "alias": alias })))
}

/// POST /api/v1/tenants/refresh: drop cached credentials and the live registration, then provision again.
pub async fn refresh_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse, AppError> {
    check_internal_token(&state, &headers)?;
    let key = body.tenant_key()?;
    let alias = state.provisioner.refresh(&key).await?;
    Ok(success_one_ok(json!({ "detail": "Alias refreshed", "alias": alias })))
}

fn require_tenant(ctx: &TenantContext) -> Result<&str, AppError> {
    ctx.get()
        .ok_or_else(|| TenancyError::TenantUnresolved("tenant-scoped endpoint requires a tenant".into()).into())
}

/// GET /api/v1/tenant/current: the request's alias and the database its tenant pool is connected to.
pub async fn current_tenant(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<impl IntoResponse, AppError> {
    let alias = require_tenant(&ctx)?;
    let pool = state.tenant_db.pool(ModelClass::TenantScoped, &ctx)?;
    let (database,): (String,) = sqlx::query_as("SELECT current_database()").fetch_one(&pool).await?;
    Ok(success_one_ok(json!({ "alias": alias, "database": database })))
}

/// GET /api/v1/tenant/names/:kind/:id: display name from the internal master service, or null.
pub async fn lookup_name(
    State(state): State<AppState>,
    ctx: TenantContext,
    headers: HeaderMap,
    Path((kind, id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, AppError> {
    require_tenant(&ctx)?;
    if kind.is_empty() || !kind.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(AppError::BadRequest(format!("invalid kind '{}'", kind)));
    }
    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let name = state.names.resolve(&kind, Some(id), authorization).await;
    Ok(success_one_ok(json!({ "kind": kind, "id": id, "name": name })))
}
