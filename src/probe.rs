//! Pre-flight connectivity check run before an alias is committed to the registry.

use crate::registry::TenantDbConfig;
use async_trait::async_trait;
use sqlx::{ConnectOptions, Connection};

/// Result of a probe: `ok` or the reason it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub ok: bool,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn success() -> Self {
        ProbeOutcome { ok: true, error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ProbeOutcome {
            ok: false,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Open one real connection to `target` within `target.connect_timeout`, then close it.
    async fn probe(&self, target: &TenantDbConfig) -> ProbeOutcome;
}

/// Probes PostgreSQL by opening and closing a single connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgProbe;

#[async_trait]
impl ConnectivityProbe for PgProbe {
    async fn probe(&self, target: &TenantDbConfig) -> ProbeOutcome {
        tracing::info!(
            user = %target.user,
            host = %target.host,
            port = target.port,
            database = %target.database,
            "testing DB connection"
        );
        // The connection is owned by this scope: it is closed explicitly on success and
        // dropped (socket closed) on every other path, including timeout and cancellation.
        let attempt = tokio::time::timeout(target.connect_timeout, target.connect_options().connect()).await;
        match attempt {
            Ok(Ok(conn)) => {
                if let Err(e) = conn.close().await {
                    tracing::debug!(error = %e, "closing probe connection");
                }
                tracing::info!(database = %target.database, "DB connection OK");
                ProbeOutcome::success()
            }
            Ok(Err(e)) => {
                tracing::error!(database = %target.database, error = %e, "DB connection FAILED");
                ProbeOutcome::failure(e.to_string())
            }
            Err(_) => {
                tracing::error!(database = %target.database, timeout = ?target.connect_timeout, "DB connection timed out");
                ProbeOutcome::failure(format!("connect timed out after {:?}", target.connect_timeout))
            }
        }
    }
}
