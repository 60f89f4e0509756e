//! Process-wide alias → live tenant connection table.
//!
//! Read on every tenant-scoped request, written only on first use or refresh.
//! Backed by a sharded map, so registering alias X never blocks a lookup of alias Y.

use crate::config::TenancyConfig;
use crate::tenant::TenantDescriptor;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// Everything needed to dial a tenant database. Replaces ad hoc settings maps.
#[derive(Clone, PartialEq, Eq)]
pub struct TenantDbConfig {
    /// Host actually dialed; may differ from the host reported upstream.
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub max_age: Duration,
    pub health_check: bool,
    pub connect_timeout: Duration,
    pub max_connections: u32,
}

impl std::fmt::Debug for TenantDbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantDbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("max_age", &self.max_age)
            .field("health_check", &self.health_check)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl TenantDbConfig {
    /// Combine a fetched descriptor, its plaintext password, and the pool settings from configuration.
    pub fn from_descriptor(
        descriptor: &TenantDescriptor,
        password: String,
        port: u16,
        config: &TenancyConfig,
    ) -> Self {
        TenantDbConfig {
            host: config.dial_host.clone(),
            port,
            database: descriptor.db_name.clone(),
            user: descriptor.db_user.clone(),
            password,
            max_age: config.conn_max_age,
            health_check: config.health_checks,
            connect_timeout: config.connect_timeout,
            max_connections: config.tenant_max_connections,
        }
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
    }

    /// Lazy pool: no connection is opened until first acquire.
    pub fn lazy_pool(&self) -> PgPool {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .max_lifetime(self.max_age)
            .test_before_acquire(self.health_check)
            .acquire_timeout(self.connect_timeout)
            .connect_lazy_with(self.connect_options())
    }
}

/// A registered tenant target and the pool that serves it.
#[derive(Debug)]
pub struct RegisteredConnection {
    pub alias: String,
    pub config: TenantDbConfig,
    pub pool: PgPool,
}

impl RegisteredConnection {
    /// Build a connection entry with a lazy pool, ready to be handed to `AliasRegistry::register_connection`.
    pub fn new(alias: impl Into<String>, config: TenantDbConfig) -> Self {
        let pool = config.lazy_pool();
        RegisteredConnection {
            alias: alias.into(),
            config,
            pool,
        }
    }
}

/// Outcome of `AliasRegistry::register`.
#[derive(Debug, Clone)]
pub enum Registration {
    Created(Arc<RegisteredConnection>),
    /// The alias was already present; the existing entry is returned untouched.
    Existing(Arc<RegisteredConnection>),
}

impl Registration {
    pub fn connection(&self) -> &Arc<RegisteredConnection> {
        match self {
            Registration::Created(c) | Registration::Existing(c) => c,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Registration::Created(_))
    }
}

/// Injectable registry service; share it by `Arc`, never as a global.
#[derive(Default)]
pub struct AliasRegistry {
    entries: DashMap<String, Arc<RegisteredConnection>>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// First writer wins. Re-registering an alias leaves the live entry (and its pool) untouched.
    /// The insert is a single atomic step, so no half-built entry is ever visible.
    pub fn register(&self, alias: &str, config: TenantDbConfig) -> Registration {
        match self.entries.entry(alias.to_string()) {
            Entry::Occupied(existing) => {
                tracing::debug!(alias, "alias already registered");
                Registration::Existing(existing.get().clone())
            }
            Entry::Vacant(slot) => {
                let conn = Arc::new(RegisteredConnection::new(alias, config));
                log_registered(&conn);
                slot.insert(conn.clone());
                Registration::Created(conn)
            }
        }
    }

    /// Register an entry prepared ahead of time (e.g. already migrated). Same first-writer-wins
    /// rule as `register`; a losing entry's pool is closed.
    pub async fn register_connection(&self, conn: RegisteredConnection) -> Registration {
        let registration = match self.entries.entry(conn.alias.clone()) {
            Entry::Occupied(existing) => Registration::Existing(existing.get().clone()),
            Entry::Vacant(slot) => {
                let conn = Arc::new(conn);
                log_registered(&conn);
                slot.insert(conn.clone());
                return Registration::Created(conn);
            }
        };
        tracing::debug!(alias = %conn.alias, "alias already registered, discarding prepared pool");
        conn.pool.close().await;
        registration
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.entries.contains_key(alias)
    }

    pub fn get(&self, alias: &str) -> Option<Arc<RegisteredConnection>> {
        self.entries.get(alias).map(|e| e.value().clone())
    }

    /// Remove the alias and close its pooled connections. Returns whether an entry existed.
    pub async fn unregister(&self, alias: &str) -> bool {
        // Remove first so new requests stop picking the pool up, then drain it outside the map lock.
        match self.entries.remove(alias) {
            Some((_, conn)) => {
                conn.pool.close().await;
                tracing::info!(alias, "unregistered DB alias");
                true
            }
            None => false,
        }
    }

    pub fn aliases(&self) -> Vec<String> {
        let mut out: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn log_registered(conn: &RegisteredConnection) {
    tracing::info!(
        alias = %conn.alias,
        user = %conn.config.user,
        host = %conn.config.host,
        port = conn.config.port,
        database = %conn.config.database,
        "registered DB alias"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_config(database: &str, password: &str) -> TenantDbConfig {
        TenantDbConfig {
            host: "127.0.0.1".into(),
            port: 5432,
            database: database.into(),
            user: "u".into(),
            password: password.into(),
            max_age: Duration::from_secs(60),
            health_check: true,
            connect_timeout: Duration::from_secs(5),
            max_connections: 2,
        }
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let registry = AliasRegistry::new();
        let first = registry.register("client_1", db_config("t1", "a"));
        assert!(first.is_created());

        let second = registry.register("client_1", db_config("other", "b"));
        assert!(!second.is_created());
        assert_eq!(second.connection().config.database, "t1");
        assert!(Arc::ptr_eq(first.connection(), second.connection()));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn unregister_removes_and_closes_pool() {
        let registry = AliasRegistry::new();
        let conn = registry.register("client_2", db_config("t2", "a")).connection().clone();
        assert!(registry.contains("client_2"));

        assert!(registry.unregister("client_2").await);
        assert!(!registry.contains("client_2"));
        assert!(conn.pool.is_closed());
        assert!(!registry.unregister("client_2").await);
    }

    #[tokio::test]
    async fn concurrent_registration_converges() {
        let registry = Arc::new(AliasRegistry::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.register("client_3", db_config(&format!("t{i}"), "p")).connection().clone()
            }));
        }
        let mut winners = Vec::new();
        for h in handles {
            winners.push(h.await.unwrap());
        }
        assert_eq!(registry.len(), 1);
        let live = registry.get("client_3").unwrap();
        assert!(winners.iter().all(|c| Arc::ptr_eq(c, &live)));
    }

    #[tokio::test]
    async fn prepared_connection_loses_to_live_entry() {
        let registry = AliasRegistry::new();
        let live = registry.register("client_4", db_config("t4", "a")).connection().clone();

        let prepared = RegisteredConnection::new("client_4", db_config("t4_new", "b"));
        let losing_pool = prepared.pool.clone();
        let outcome = registry.register_connection(prepared).await;
        assert!(!outcome.is_created());
        assert!(Arc::ptr_eq(outcome.connection(), &live));
        assert!(losing_pool.is_closed());
        assert!(!live.pool.is_closed());
    }

    #[test]
    fn debug_hides_password() {
        let printed = format!("{:?}", db_config("t", "hunter2"));
        assert!(!printed.contains("hunter2"));
    }
}
