//! Tenant identity and the database descriptor fetched for it.

use crate::error::TenancyError;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Prefix of aliases synthesized from a numeric client id.
pub const CLIENT_ALIAS_PREFIX: &str = "client_";

/// Identifier used to look a tenant up upstream. Exactly one form per lookup.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TenantKey {
    ClientId(i64),
    Username(String),
}

impl TenantKey {
    /// Key under which the tenant's credentials are cached.
    pub fn cache_key(&self) -> String {
        match self {
            TenantKey::ClientId(id) => format!("tenant_db_info:{}", id),
            TenantKey::Username(name) => format!("tenant_db_info:username:{}", name),
        }
    }

    /// Alias to fall back on when the upstream record names neither an alias nor a user id.
    /// Never used to find a registered tenant: the same alias may belong to another client.
    pub fn expected_alias(&self) -> Option<String> {
        match self {
            TenantKey::ClientId(id) => Some(format!("{}{}", CLIENT_ALIAS_PREFIX, id)),
            TenantKey::Username(_) => None,
        }
    }

    /// Parse an alias of the form `client_<n>` back into a client id key.
    pub fn from_client_alias(alias: &str) -> Option<Self> {
        alias
            .strip_prefix(CLIENT_ALIAS_PREFIX)
            .and_then(|n| n.parse::<i64>().ok())
            .map(TenantKey::ClientId)
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantKey::ClientId(id) => write!(f, "client_id={}", id),
            TenantKey::Username(name) => write!(f, "client_username={}", name),
        }
    }
}

/// Password as delivered by the accounts service. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub enum DbPassword {
    Plain(String),
    Encrypted(String),
}

impl fmt::Debug for DbPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbPassword::Plain(_) => f.write_str("Plain(<redacted>)"),
            DbPassword::Encrypted(_) => f.write_str("Encrypted(<redacted>)"),
        }
    }
}

/// A tenant's database target. All scalars are normalized to strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantDescriptor {
    pub alias: String,
    pub db_name: String,
    pub db_user: String,
    /// Host reported upstream; the dialed host comes from configuration.
    pub db_host: String,
    pub db_port: String,
    pub password: DbPassword,
    pub user_id: Option<String>,
}

impl TenantDescriptor {
    pub fn port(&self) -> Result<u16, TenancyError> {
        self.db_port
            .parse()
            .map_err(|_| TenancyError::MalformedResponse(format!("db_port '{}' is not a port number", self.db_port)))
    }
}

fn alias_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("static alias pattern"))
}

/// Aliases key the registry and appear in logs; only word characters are accepted.
pub fn is_valid_alias(alias: &str) -> bool {
    alias_pattern().is_match(alias)
}
