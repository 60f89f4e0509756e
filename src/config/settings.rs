//! Process configuration read from the environment. Parsed once at start; values never change mid-process.

use crate::error::ConfigError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for every duration setting (ten years).
const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Every option the tenancy layer recognizes. See `from_lookup` for env names and defaults.
#[derive(Clone)]
pub struct TenancyConfig {
    /// Fixed (master) store.
    pub database_url: String,
    pub bind_addr: SocketAddr,
    /// Accounts service base URL, without trailing slash.
    pub accounts_url: String,
    /// Sent as `X-Internal-Token` to the accounts service and required on the admin endpoints.
    pub internal_token: Option<String>,
    pub accounts_timeout: Duration,
    /// URL-safe base64 Fernet key used to decrypt `db_password_encrypted`.
    pub encryption_key: Option<String>,
    /// Host actually dialed for tenant databases; the host reported upstream is only logged.
    pub dial_host: String,
    pub conn_max_age: Duration,
    pub connect_timeout: Duration,
    pub health_checks: bool,
    pub tenant_max_connections: u32,
    pub cache_ttl: Duration,
    pub name_cache_ttl: Duration,
    pub internal_master_base: String,
    pub internal_master_timeout: Duration,
    /// HS256 secret for bearer tokens. Bearer auth is disabled when unset.
    pub jwt_secret: Option<String>,
    pub auto_migrate: bool,
    pub tenant_migrations_dir: Option<PathBuf>,
}

impl std::fmt::Debug for TenancyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenancyConfig")
            .field("bind_addr", &self.bind_addr)
            .field("accounts_url", &self.accounts_url)
            .field("internal_token", &self.internal_token.as_ref().map(|_| "<redacted>"))
            .field("accounts_timeout", &self.accounts_timeout)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .field("dial_host", &self.dial_host)
            .field("conn_max_age", &self.conn_max_age)
            .field("connect_timeout", &self.connect_timeout)
            .field("health_checks", &self.health_checks)
            .field("tenant_max_connections", &self.tenant_max_connections)
            .field("cache_ttl", &self.cache_ttl)
            .field("name_cache_ttl", &self.name_cache_ttl)
            .field("internal_master_base", &self.internal_master_base)
            .field("internal_master_timeout", &self.internal_master_timeout)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("auto_migrate", &self.auto_migrate)
            .field("tenant_migrations_dir", &self.tenant_migrations_dir)
            .finish_non_exhaustive()
    }
}

impl TenancyConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let secs = |name: &str, default: u64| -> Result<Duration, ConfigError> {
            match get(name) {
                Some(v) => match v.parse::<u64>() {
                    Ok(n) if n <= MAX_DURATION_SECS => Ok(Duration::from_secs(n)),
                    _ => Err(ConfigError::Invalid { var: name.to_string(), value: v }),
                },
                None => Ok(Duration::from_secs(default)),
            }
        };
        let flag = |name: &str, default: bool| -> Result<bool, ConfigError> {
            match get(name) {
                Some(v) => match v.to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" | "on" => Ok(true),
                    "0" | "false" | "no" | "off" => Ok(false),
                    _ => Err(ConfigError::Invalid { var: name.to_string(), value: v }),
                },
                None => Ok(default),
            }
        };

        let bind_addr = match get("BIND_ADDR") {
            Some(v) => v
                .parse()
                .map_err(|_| ConfigError::Invalid { var: "BIND_ADDR".into(), value: v })?,
            None => SocketAddr::from(([0, 0, 0, 0], 3000)),
        };
        let tenant_max_connections = match get("TENANT_POOL_MAX_CONNECTIONS") {
            Some(v) => match v.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "TENANT_POOL_MAX_CONNECTIONS".into(),
                        value: v,
                    })
                }
            },
            None => 5,
        };

        Ok(TenancyConfig {
            database_url: get("DATABASE_URL").unwrap_or_else(|| "postgres://localhost/tenancy".into()),
            bind_addr,
            accounts_url: get("ACCOUNTS_SERVICE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8000".into())
                .trim_end_matches('/')
                .to_string(),
            internal_token: get("INTERNAL_REGISTER_DB_TOKEN"),
            accounts_timeout: secs("ACCOUNTS_HTTP_TIMEOUT", 10)?,
            encryption_key: get("DB_ENCRYPTION_KEY"),
            dial_host: get("LOCAL_DB_HOST").unwrap_or_else(|| "127.0.0.1".into()),
            conn_max_age: secs("TENANT_CONN_MAX_AGE", 60)?,
            connect_timeout: secs("TENANT_CONN_TIMEOUT", 5)?,
            health_checks: flag("TENANT_CONN_HEALTH_CHECKS", true)?,
            tenant_max_connections,
            cache_ttl: secs("TENANT_DB_CACHE_TTL", 2000)?,
            name_cache_ttl: secs("NAME_CACHE_TTL", 600)?,
            internal_master_base: get("INTERNAL_MASTER_BASE")
                .unwrap_or_else(|| "http://127.0.0.1:8000".into())
                .trim_end_matches('/')
                .to_string(),
            internal_master_timeout: secs("INTERNAL_MASTER_TIMEOUT", 5)?,
            jwt_secret: get("JWT_SECRET"),
            auto_migrate: flag("ASSET_AUTO_MIGRATE", false)?,
            tenant_migrations_dir: get("TENANT_MIGRATIONS_DIR").map(PathBuf::from),
        })
    }
}
