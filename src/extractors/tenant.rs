//! Tenant identity from the request: bearer JWT claims, or the `X-Tenant-Alias` header as fallback.

use crate::context::TenantContext;
use crate::error::{AppError, TenancyError};
use crate::tenant::{is_valid_alias, TenantKey};
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde_json::Value;

/// Fallback header naming the tenant alias when no bearer token is sent.
pub const TENANT_ALIAS_HEADER: &str = "X-Tenant-Alias";

/// Who the request acts for. Fields are read from the token root first, then from its nested `tenant` object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TenantIdentity {
    pub alias: Option<String>,
    pub client_username: Option<String>,
    pub client_id: Option<i64>,
    pub username: Option<String>,
    pub user_id: Option<Value>,
    pub permissions: Value,
}

impl TenantIdentity {
    pub fn from_alias(alias: impl Into<String>) -> Self {
        TenantIdentity {
            alias: Some(alias.into()),
            ..Default::default()
        }
    }

    /// Build from verified JWT claims. A token must name both the tenant alias and the username.
    pub fn from_claims(claims: &Value) -> Result<Self, AppError> {
        let alias = claim_str(claims, "tenant_alias", "alias")
            .ok_or_else(|| AppError::Unauthorized("Tenant alias missing in token.".into()))?;
        let username = claim_str(claims, "username", "username")
            .ok_or_else(|| AppError::Unauthorized("Username missing in token.".into()))?;
        let client_id = match claim(claims, "client_id", "client_id") {
            Some(v) => Some(
                as_client_id(v).ok_or_else(|| AppError::Unauthorized(format!("client_id '{}' is not a number", v)))?,
            ),
            None => None,
        };
        Ok(TenantIdentity {
            alias: Some(alias),
            client_username: claim_str(claims, "client_username", "client_username"),
            client_id,
            username: Some(username),
            user_id: claims.get("user_id").filter(|v| !v.is_null()).cloned(),
            permissions: claims.get("permissions").cloned().unwrap_or_else(|| Value::Object(Default::default())),
        })
    }

    /// Upstream lookup key: `client_username`, then `client_id`, then an alias of the form `client_<n>`.
    pub fn tenant_key(&self) -> Result<TenantKey, TenancyError> {
        if let Some(name) = &self.client_username {
            return Ok(TenantKey::Username(name.clone()));
        }
        if let Some(id) = self.client_id {
            return Ok(TenantKey::ClientId(id));
        }
        self.alias
            .as_deref()
            .and_then(TenantKey::from_client_alias)
            .ok_or_else(|| {
                TenancyError::TenantUnresolved(format!(
                    "no client identifier for alias '{}'",
                    self.alias.as_deref().unwrap_or("")
                ))
            })
    }
}

fn claim<'a>(claims: &'a Value, key: &str, nested_key: &str) -> Option<&'a Value> {
    let present = |v: &&Value| !v.is_null() && v.as_str() != Some("");
    claims
        .get(key)
        .filter(present)
        .or_else(|| claims.get("tenant").and_then(|t| t.get(nested_key)).filter(present))
}

fn claim_str(claims: &Value, key: &str, nested_key: &str) -> Option<String> {
    claim(claims, key, nested_key).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn as_client_id(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?;
    let value = value.to_str().ok()?;
    value.strip_prefix("Bearer ")
}

/// Identify the tenant of a request. `Ok(None)` means the request is master-only.
/// A bearer token is only honored when a verification key is configured.
/// `exp` is optional, but an expired one is always rejected.
pub fn identify(headers: &HeaderMap, key: Option<&DecodingKey>) -> Result<Option<TenantIdentity>, AppError> {
    if let (Some(token), Some(key)) = (extract_bearer(headers), key) {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims::<&str>(&[]);
        let claims = decode::<Value>(token, key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AppError::Unauthorized("Token expired.".into()),
                _ => AppError::Unauthorized("Invalid token.".into()),
            })?
            .claims;
        let identity = TenantIdentity::from_claims(&claims)?;
        validate_alias(identity.alias.as_deref())?;
        return Ok(Some(identity));
    }

    let alias = headers
        .get(TENANT_ALIAS_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty());
    match alias {
        Some(alias) => {
            validate_alias(Some(alias))?;
            Ok(Some(TenantIdentity::from_alias(alias)))
        }
        None => Ok(None),
    }
}

fn validate_alias(alias: Option<&str>) -> Result<(), AppError> {
    match alias {
        Some(a) if !is_valid_alias(a) => Err(TenancyError::TenantUnresolved(format!("invalid alias '{}'", a)).into()),
        _ => Ok(()),
    }
}

/// The request's tenant context as installed by the tenant middleware; unresolved when none was installed.
#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<TenantContext>().cloned().unwrap_or_default())
    }
}

/// Identity of the request, if the middleware resolved one.
#[async_trait]
impl<S> FromRequestParts<S> for TenantIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantIdentity>()
            .cloned()
            .ok_or_else(|| TenancyError::TenantUnresolved("request carries no tenant identity".into()).into())
    }
}
