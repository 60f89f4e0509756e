//! TTL key/value cache shared across requests. Sharded, so writes for one key never wait on reads of another.

use crate::tenant::TenantDescriptor;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Tenant key → fetched database credentials.
pub type CredentialCache = TtlCache<TenantDescriptor>;

struct CacheEntry<V> {
    value: V,
    /// `None` when the TTL reaches past what the clock can represent.
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

pub struct TtlCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the value if present and not yet expired. Expired entries are evicted, never served.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        None
    }

    /// Store with the cache's default TTL, overwriting any existing entry.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.put(key, value, self.ttl);
    }

    /// Overwrites any existing entry and evicts everything already expired.
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                expires_at: now.checked_add(ttl),
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Entries currently held, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
