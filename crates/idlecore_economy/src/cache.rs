//! # Expiration Cache
//!
//! Generic key/value store where every entry carries an absolute expiry
//! instant. Expired entries are evicted lazily on read, and `set` sweeps
//! the whole map each time it doubles past the last sweep, so keys that
//! are never read again cannot pile up. There is no background thread.
//!
//! ## Thread Safety
//!
//! Backed by a `parking_lot::RwLock`: concurrent readers proceed in
//! parallel, writers (insert, eviction) are exclusive. The cache is shared
//! by every per-player task of a tick through an `Arc`.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Map size below which `set` never sweeps.
const MIN_SWEEP_LEN: usize = 64;

/// A cached value and the instant after which it is stale.
#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Thread-safe TTL cache.
#[derive(Debug)]
pub struct ExpirationCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    /// Length at which the next `set` sweeps. Only touched under the
    /// write lock.
    sweep_at: AtomicUsize,
}

impl<K, V> Default for ExpirationCache<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            sweep_at: AtomicUsize::new(MIN_SWEEP_LEN),
        }
    }
}

impl<K, V> ExpirationCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous entry.
    ///
    /// The entry expires `ttl` from now.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        if entries.len() >= self.sweep_at.load(Ordering::Relaxed) {
            entries.retain(|_, entry| !entry.is_expired(now));
            self.sweep_at
                .store((entries.len() * 2).max(MIN_SWEEP_LEN), Ordering::Relaxed);
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    /// Evicts every expired entry now. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Returns the value for `key` if present and not yet expired.
    ///
    /// An expired entry is removed before returning `None`.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        // Stale: take the write lock and evict, unless another writer
        // refreshed the entry in between.
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(key) {
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
            entries.remove(key);
        }
        None
    }

    /// Removes `key`, returning its value if it was present and fresh.
    pub fn remove(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.entries
            .write()
            .remove(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value)
    }

    /// Number of stored entries, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
