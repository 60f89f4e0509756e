//! "Ensure alias ready": everything a request does before its first tenant-scoped data access.
//!
//! credential cache → accounts fetch (on miss) → registry hit? done : decrypt → probe →
//! migrate (optional) → register. The alias always comes from the tenant's own descriptor,
//! never from the shape of the key. Lookups for one tenant key are serialized, and so is
//! everything that registers or replaces one alias, so concurrent first use converges on a
//! single registration while other tenants proceed independently.

use crate::cache::CredentialCache;
use crate::config::TenancyConfig;
use crate::crypto::SecretDecryptor;
use crate::error::TenancyError;
use crate::migration::TenantMigrator;
use crate::probe::ConnectivityProbe;
use crate::registry::{AliasRegistry, RegisteredConnection, TenantDbConfig};
use crate::resolver::CredentialSource;
use crate::router::DbTarget;
use crate::tenant::{DbPassword, TenantDescriptor, TenantKey};
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async locks by key. An entry lives only while a caller holds or waits on it.
struct KeyedLocks<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    fn new() -> Self {
        KeyedLocks { locks: DashMap::new() }
    }

    async fn lock(&self, key: &K) -> KeyedGuard<'_, K> {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyedGuard {
            locks: &self.locks,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

struct KeyedGuard<'a, K: Eq + Hash> {
    locks: &'a DashMap<K, Arc<Mutex<()>>>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own handle left: nobody is waiting.
        self.locks.remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct Provisioner {
    config: Arc<TenancyConfig>,
    cache: Arc<CredentialCache>,
    source: Arc<dyn CredentialSource>,
    decryptor: Arc<SecretDecryptor>,
    probe: Arc<dyn ConnectivityProbe>,
    registry: Arc<AliasRegistry>,
    migrator: Option<Arc<dyn TenantMigrator>>,
    key_locks: KeyedLocks<TenantKey>,
    alias_locks: KeyedLocks<String>,
}

impl Provisioner {
    pub fn new(
        config: Arc<TenancyConfig>,
        source: Arc<dyn CredentialSource>,
        decryptor: Arc<SecretDecryptor>,
        probe: Arc<dyn ConnectivityProbe>,
        registry: Arc<AliasRegistry>,
    ) -> Self {
        let cache = Arc::new(CredentialCache::new(config.cache_ttl));
        Provisioner {
            config,
            cache,
            source,
            decryptor,
            probe,
            registry,
            migrator: None,
            key_locks: KeyedLocks::new(),
            alias_locks: KeyedLocks::new(),
        }
    }

    /// Share an existing credential cache instead of the private one.
    pub fn with_cache(mut self, cache: Arc<CredentialCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Run `migrator` against every newly provisioned tenant store before it is registered.
    pub fn with_migrator(mut self, migrator: Arc<dyn TenantMigrator>) -> Self {
        self.migrator = Some(migrator);
        self
    }

    pub fn registry(&self) -> &Arc<AliasRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    /// Return the tenant's alias, provisioning and registering its store first if needed.
    pub async fn ensure_alias_ready(&self, key: &TenantKey) -> Result<String, TenancyError> {
        let _key_guard = self.key_locks.lock(key).await;
        let descriptor = self.lookup(key).await?;

        let _alias_guard = self.alias_locks.lock(&descriptor.alias).await;
        // Another key form may have registered this alias while we waited.
        if self.registry.contains(&descriptor.alias) {
            tracing::debug!(tenant_key = %key, alias = %descriptor.alias, "alias already registered");
            return Ok(descriptor.alias);
        }
        self.provision(key, &descriptor).await
    }

    /// Drop cached credentials and any live registration, then provision from a fresh fetch.
    /// Used when the tenant's credentials are known to have rotated. The alias stays locked from
    /// unregister to register, so no other caller can slip a stale entry in between.
    pub async fn refresh(&self, key: &TenantKey) -> Result<String, TenancyError> {
        let _key_guard = self.key_locks.lock(key).await;

        let cache_key = key.cache_key();
        self.cache.invalidate(&cache_key);
        let descriptor = self.source.fetch(key).await.inspect_err(|e| {
            tracing::warn!(tenant_key = %key, error = %e, "credential refresh failed");
        })?;
        self.cache.put(cache_key, descriptor.clone(), self.config.cache_ttl);

        let _alias_guard = self.alias_locks.lock(&descriptor.alias).await;
        if self.registry.unregister(&descriptor.alias).await {
            tracing::info!(tenant_key = %key, alias = %descriptor.alias, "dropped stale alias for refresh");
        }
        self.provision(key, &descriptor).await
    }

    async fn lookup(&self, key: &TenantKey) -> Result<TenantDescriptor, TenancyError> {
        let cache_key = key.cache_key();
        if let Some(descriptor) = self.cache.get(&cache_key) {
            tracing::debug!(tenant_key = %key, "credential cache hit");
            return Ok(descriptor);
        }
        let descriptor = self.source.fetch(key).await.inspect_err(|e| {
            tracing::warn!(tenant_key = %key, error = %e, "credential fetch failed");
        })?;
        self.cache.put(cache_key, descriptor.clone(), self.config.cache_ttl);
        Ok(descriptor)
    }

    async fn provision(&self, key: &TenantKey, descriptor: &TenantDescriptor) -> Result<String, TenancyError> {
        let alias = descriptor.alias.clone();
        let password = match &descriptor.password {
            DbPassword::Plain(p) => p.clone(),
            DbPassword::Encrypted(ct) => self.decryptor.decrypt(ct).inspect_err(|e| {
                tracing::error!(tenant_key = %key, alias = %alias, error = %e, "password decryption failed");
            })?,
        };
        let db_config = TenantDbConfig::from_descriptor(descriptor, password, descriptor.port()?, &self.config);

        let outcome = self.probe.probe(&db_config).await;
        if !outcome.ok {
            let reason = outcome.error.unwrap_or_else(|| "unknown error".into());
            tracing::warn!(tenant_key = %key, alias = %alias, reason = %reason, "tenant DB unreachable, not registering");
            return Err(TenancyError::TenantDbUnreachable { alias, reason });
        }

        // Migrate on the prepared pool so the alias only becomes visible once it is fully usable.
        let conn = RegisteredConnection::new(alias.clone(), db_config);
        if let Some(migrator) = &self.migrator {
            match migrator.migrate(&DbTarget::Tenant(alias.clone()), &conn.pool).await {
                Ok(applied) => tracing::info!(alias = %alias, applied, "tenant migrations complete"),
                Err(e) => {
                    tracing::error!(alias = %alias, error = %e, "tenant migration failed, not registering");
                    conn.pool.close().await;
                    return Err(e);
                }
            }
        }

        self.registry.register_connection(conn).await;
        tracing::info!(tenant_key = %key, alias = %alias, reported_host = %descriptor.db_host, "DB alias ready");
        Ok(alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn lock_entries_are_dropped_once_released() {
        let locks: KeyedLocks<String> = KeyedLocks::new();
        {
            let _a = locks.lock(&"client_1".to_string()).await;
            let _b = locks.lock(&"client_2".to_string()).await;
            assert_eq!(locks.len(), 2);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn waiter_keeps_entry_alive() {
        let locks = Arc::new(KeyedLocks::<String>::new());
        let key = "client_1".to_string();
        let first = locks.lock(&key).await;

        let waiter = {
            let locks = locks.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&key).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }
}
