//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}'")]
    Invalid { var: String, value: String },
    #[error("config load: {0}")]
    Load(String),
}

/// Faults raised while resolving, provisioning, or routing to a tenant store.
/// Messages never carry credentials (plaintext or ciphertext).
#[derive(Error, Debug)]
pub enum TenancyError {
    #[error("tenant unresolved: {0}")]
    TenantUnresolved(String),
    #[error("accounts service unreachable at {url}: {reason}")]
    UpstreamUnreachable { url: String, reason: String },
    #[error("accounts service error {status}: {body}")]
    UpstreamError { status: u16, body: String },
    #[error("malformed accounts response: {0}")]
    MalformedResponse(String),
    #[error("DB_ENCRYPTION_KEY not set; cannot decrypt db_password_encrypted")]
    KeyNotConfigured,
    #[error("password decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("tenant database for '{alias}' unreachable: {reason}")]
    TenantDbUnreachable { alias: String, reason: String },
    #[error("tenant-scoped access attempted without a tenant context")]
    TenantAliasMissing,
    #[error("alias '{0}' is not registered")]
    AliasNotRegistered(String),
    #[error("relation across stores rejected: {left} <-> {right}")]
    CrossStoreRelation { left: String, right: String },
    #[error("schema change for {class} models rejected on store '{target}'")]
    SchemaChangeRejected { target: String, class: String },
    #[error("tenant context already set to '{current}', refusing '{requested}'")]
    ContextConflict { current: String, requested: String },
    #[error("tenant migration on '{alias}' failed: {reason}")]
    Migration { alias: String, reason: String },
}

impl TenancyError {
    /// Stable machine-readable code, also used in the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            TenancyError::TenantUnresolved(_) => "tenant_unresolved",
            TenancyError::UpstreamUnreachable { .. } => "upstream_unreachable",
            TenancyError::UpstreamError { .. } => "upstream_error",
            TenancyError::MalformedResponse(_) => "malformed_response",
            TenancyError::KeyNotConfigured => "key_not_configured",
            TenancyError::DecryptionFailed(_) => "decryption_failed",
            TenancyError::TenantDbUnreachable { .. } => "tenant_db_unreachable",
            TenancyError::TenantAliasMissing => "tenant_alias_missing",
            TenancyError::AliasNotRegistered(_) => "alias_not_registered",
            TenancyError::CrossStoreRelation { .. } => "cross_store_relation",
            TenancyError::SchemaChangeRejected { .. } => "schema_change_rejected",
            TenancyError::ContextConflict { .. } => "context_conflict",
            TenancyError::Migration { .. } => "migration_failed",
        }
    }

    /// Infrastructure faults that a client re-send may fix. Configuration and
    /// programming faults are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TenancyError::UpstreamUnreachable { .. }
                | TenancyError::UpstreamError { .. }
                | TenancyError::TenantDbUnreachable { .. }
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            TenancyError::TenantUnresolved(_) => StatusCode::UNAUTHORIZED,
            TenancyError::UpstreamUnreachable { .. }
            | TenancyError::UpstreamError { .. }
            | TenancyError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
            TenancyError::TenantDbUnreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            TenancyError::CrossStoreRelation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            TenancyError::KeyNotConfigured
            | TenancyError::DecryptionFailed(_)
            | TenancyError::TenantAliasMissing
            | TenancyError::AliasNotRegistered(_)
            | TenancyError::SchemaChangeRejected { .. }
            | TenancyError::ContextConflict { .. }
            | TenancyError::Migration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tenancy(#[from] TenancyError),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::Tenancy(e) => (e.status(), e.code()),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    (StatusCode::NOT_FOUND, "not_found")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
                }
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        };
        let details = match &self {
            AppError::Tenancy(e) => Some(serde_json::json!({ "retryable": e.is_retryable() })),
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}
