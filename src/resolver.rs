//! Fetch tenant database credentials from the accounts service.
//! No caching here: the caller owns cache policy (see `provision`).

use crate::error::TenancyError;
use crate::tenant::{is_valid_alias, DbPassword, TenantDescriptor, TenantKey, CLIENT_ALIAS_PREFIX};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use std::time::Duration;

/// Header carrying the shared secret expected by the accounts service.
pub const INTERNAL_TOKEN_HEADER: &str = "X-Internal-Token";

/// Upstream error bodies are cut to this many characters.
const ERROR_BODY_LIMIT: usize = 280;

/// Where tenant credentials come from.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self, key: &TenantKey) -> Result<TenantDescriptor, TenancyError>;
}

/// HTTP client for the accounts service credential routes.
#[derive(Clone)]
pub struct AccountsClient {
    http: reqwest::Client,
    base_url: String,
    internal_token: Option<String>,
}

impl AccountsClient {
    pub fn new(
        base_url: impl Into<String>,
        internal_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TenancyError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TenancyError::UpstreamUnreachable {
                url: base_url.clone(),
                reason: format!("http client: {}", e),
            })?;
        Ok(AccountsClient {
            http,
            base_url,
            internal_token: internal_token.filter(|t| !t.is_empty()),
        })
    }

    /// Lookup route and query for a key: numeric ids and usernames use different routes.
    fn lookup_url(&self, key: &TenantKey) -> Result<(Url, Vec<(&'static str, String)>), TenancyError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| TenancyError::UpstreamUnreachable {
            url: self.base_url.clone(),
            reason: format!("invalid accounts url: {}", e),
        })?;
        let query = {
            let mut segments = url.path_segments_mut().map_err(|_| TenancyError::UpstreamUnreachable {
                url: self.base_url.clone(),
                reason: "accounts url cannot be a base".into(),
            })?;
            segments.pop_if_empty();
            match key {
                TenantKey::ClientId(id) => {
                    segments.extend(["Client_db_info", "by-client-id", ""]);
                    vec![("client_id", id.to_string())]
                }
                TenantKey::Username(name) => {
                    segments.extend(["api", "master", "user-dbs", "by-username", name.as_str()]);
                    vec![("username", name.clone())]
                }
            }
        };
        Ok((url, query))
    }
}

#[async_trait]
impl CredentialSource for AccountsClient {
    async fn fetch(&self, key: &TenantKey) -> Result<TenantDescriptor, TenancyError> {
        let (url, query) = self.lookup_url(key)?;
        tracing::info!(tenant_key = %key, url = %url, "fetching client DB info");

        let mut request = self
            .http
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&query);
        if let Some(token) = &self.internal_token {
            request = request.header(INTERNAL_TOKEN_HEADER, token);
        }

        let resp = request.send().await.map_err(|e| {
            tracing::warn!(tenant_key = %key, url = %url, error = %e, "accounts request failed");
            TenancyError::UpstreamUnreachable {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| TenancyError::UpstreamUnreachable {
            url: url.to_string(),
            reason: format!("reading body: {}", e),
        })?;

        if status != StatusCode::OK {
            tracing::warn!(tenant_key = %key, url = %url, status = status.as_u16(), "accounts returned error");
            return Err(TenancyError::UpstreamError {
                status: status.as_u16(),
                body: truncate(&body, ERROR_BODY_LIMIT),
            });
        }

        let data: Value = serde_json::from_str(&body)
            .map_err(|_| TenancyError::MalformedResponse("accounts returned non-JSON response".into()))?;
        let descriptor = parse_descriptor(&data, key)?;
        tracing::debug!(tenant_key = %key, alias = %descriptor.alias, "client DB info fetched");
        Ok(descriptor)
    }
}

/// Validate and normalize an accounts payload. Scalars become strings; `alias`
/// falls back to `client_<user_id>`.
pub fn parse_descriptor(data: &Value, key: &TenantKey) -> Result<TenantDescriptor, TenancyError> {
    let obj = data
        .as_object()
        .ok_or_else(|| TenancyError::MalformedResponse("accounts response is not an object".into()))?;

    let required = |field: &str| -> Result<String, TenancyError> {
        obj.get(field)
            .and_then(scalar_string)
            .ok_or_else(|| TenancyError::MalformedResponse(format!("missing key '{}' in accounts response", field)))
    };
    let db_name = required("db_name")?;
    let db_user = required("db_user")?;
    let db_host = required("db_host")?;
    let db_port = required("db_port")?;

    let password = match (
        obj.get("db_password_encrypted").and_then(scalar_string),
        obj.get("db_password").and_then(scalar_string),
    ) {
        (Some(ct), _) => DbPassword::Encrypted(ct),
        (None, Some(plain)) => DbPassword::Plain(plain),
        (None, None) => {
            return Err(TenancyError::MalformedResponse(
                "missing db_password or db_password_encrypted in accounts response".into(),
            ))
        }
    };

    let user_id = obj.get("user_id").and_then(scalar_string);
    let alias = obj
        .get("alias")
        .and_then(scalar_string)
        .or_else(|| user_id.as_ref().map(|id| format!("{}{}", CLIENT_ALIAS_PREFIX, id)))
        .or_else(|| key.expected_alias())
        .ok_or_else(|| TenancyError::MalformedResponse("response carries neither alias nor user_id".into()))?;
    if !is_valid_alias(&alias) {
        return Err(TenancyError::MalformedResponse(format!("invalid alias '{}'", alias)));
    }

    Ok(TenantDescriptor {
        alias,
        db_name,
        db_user,
        db_host,
        db_port,
        password,
        user_id,
    })
}

/// Non-empty string or number/bool rendered as a string; null, empty and containers are absent.
fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn truncate(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(n).collect();
        out.push('…');
        out
    }
}
