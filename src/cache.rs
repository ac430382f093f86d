//! Read-through TTL cache shielding the database from repeated lookups.
//!
//! Keys are namespaced by [`CacheDomain`] so writers can invalidate a whole
//! group of entries (config, subscription list, post counters) in one call
//! instead of matching key substrings. The key space is bounded — one config
//! row, one subscription list, a handful of counters — so there is no
//! eviction beyond TTL expiry.
//!
//! Correctness never depends on the cache: a [`QueryCache::disabled`]
//! instance where every lookup misses must produce identical results, only
//! slower. Tests run in that mode.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Cache TTL for the singleton config row (changes rarely).
pub const CONFIG_TTL: Duration = Duration::from_secs(120);
/// Cache TTL for the subscription list.
pub const SUBSCRIPTIONS_TTL: Duration = Duration::from_secs(60);
/// Cache TTL for count-style aggregates.
pub const STATS_TTL: Duration = Duration::from_secs(30);

/// Typed cache namespaces. Writers invalidate the domain they mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheDomain {
    /// The singleton bot config row.
    Config,
    /// The subscription list.
    Subscriptions,
    /// Post counters and aggregates.
    PostStats,
}

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    inserted: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted) >= self.ttl
    }
}

/// Process-owned query cache, injected into the storage layer.
///
/// A mutex-guarded map is sufficient here: the bounded key space and short
/// critical sections mean contention between the delivery cycle and the
/// dashboard's reads is negligible.
pub struct QueryCache {
    entries: Mutex<HashMap<(CacheDomain, String), Entry>>,
    enabled: bool,
}

impl QueryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            enabled: true,
        }
    }

    /// A cache where every lookup misses and every insert is dropped.
    pub fn disabled() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            enabled: false,
        }
    }

    /// Look up a cached value. Expired entries are treated as absent and
    /// removed on observation.
    pub fn get<T: Send + Sync + 'static>(&self, domain: CacheDomain, key: &str) -> Option<Arc<T>> {
        if !self.enabled {
            return None;
        }
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let map_key = (domain, key.to_string());
        match entries.get(&map_key) {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                entry.value.clone().downcast::<T>().ok()
            }
            Some(_) => {
                entries.remove(&map_key);
                None
            }
            None => None,
        }
    }

    /// Store a value under `(domain, key)` with the given TTL.
    pub fn insert<T: Send + Sync + 'static>(
        &self,
        domain: CacheDomain,
        key: &str,
        value: Arc<T>,
        ttl: Duration,
    ) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.insert(
            (domain, key.to_string()),
            Entry {
                value,
                inserted: Instant::now(),
                ttl,
            },
        );
    }

    /// Drop every entry in a domain. Writers call this after a successful
    /// mutation, before returning, so the next read sees fresh data even
    /// inside the old TTL window.
    pub fn invalidate(&self, domain: CacheDomain) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.retain(|(d, _), _| *d != domain);
    }

    /// Number of live (possibly expired) entries, for diagnostics.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}
