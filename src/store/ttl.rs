//! TTL Store Module
//!
//! Insertion-ordered storage with an optional TTL and an optional entry cap.
//! Expiry is lazy: an expired entry is removed the next time its key is
//! looked at. Capacity is enforced on write by dropping the oldest write.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::store::{CacheEntry, InsertionOrder, StoreStats};

/// A store shared between callers, guarded by a short-lived lock.
pub type SharedStore<K, V> = Arc<Mutex<TtlStore<K, V>>>;

// == TTL Store ==
/// Key-value storage with lazy TTL expiry and FIFO eviction.
#[derive(Debug)]
pub struct TtlStore<K, V> {
    /// Key-value storage
    entries: HashMap<K, CacheEntry<V>>,
    /// Write order, oldest first
    order: InsertionOrder<K>,
    /// Performance statistics
    stats: StoreStats,
    /// Lifetime of each entry, None = never expires by time
    ttl: Option<Duration>,
    /// Maximum number of entries, None = unbounded
    max_entries: Option<usize>,
}

impl<K, V> TtlStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    // == Constructor ==
    /// Creates an empty store.
    ///
    /// A zero `ttl` means no TTL and a zero `max_entries` means no cap.
    pub fn new(ttl: Option<Duration>, max_entries: Option<usize>) -> Self {
        Self {
            entries: HashMap::new(),
            order: InsertionOrder::new(),
            stats: StoreStats::new(),
            ttl: ttl.filter(|ttl| !ttl.is_zero()),
            max_entries: max_entries.filter(|&max| max > 0),
        }
    }

    /// Creates an empty store wrapped for sharing.
    pub fn shared(ttl: Option<Duration>, max_entries: Option<usize>) -> SharedStore<K, V> {
        Arc::new(Mutex::new(Self::new(ttl, max_entries)))
    }

    // == Contains ==
    /// Returns true if a live entry exists for `key`.
    ///
    /// An entry whose TTL has elapsed is removed as a side effect.
    pub fn contains(&mut self, key: &K) -> bool {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired(self.ttl),
            None => return false,
        };

        if expired {
            self.remove_entry(key);
            self.stats.record_expiration();
            return false;
        }

        true
    }

    // == Get ==
    /// Retrieves a clone of the value stored for `key`, if it is still live.
    ///
    /// Reads do not affect eviction order.
    pub fn get(&mut self, key: &K) -> Option<V> {
        if !self.contains(key) {
            self.stats.record_miss();
            return None;
        }

        self.stats.record_hit();
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    // == Set ==
    /// Stores a value under `key` with a fresh insertion time.
    ///
    /// If the store is at capacity and `key` is new, the oldest entry is
    /// evicted first. Returns the evicted key, if any.
    pub fn set(&mut self, key: K, value: V) -> Option<K> {
        let mut evicted = None;

        if let Some(max_entries) = self.max_entries {
            if !self.entries.contains_key(&key) && self.entries.len() >= max_entries {
                if let Some(oldest) = self.order.pop_oldest() {
                    self.entries.remove(&oldest);
                    self.stats.record_eviction();
                    evicted = Some(oldest);
                }
            }
        }

        self.entries.insert(key.clone(), CacheEntry::new(value));
        self.order.record_write(key);
        self.stats.set_total_entries(self.entries.len());

        evicted
    }

    // == Delete ==
    /// Removes the entry for `key`. Returns true if something was removed.
    pub fn delete(&mut self, key: &K) -> bool {
        self.remove_entry(key)
    }

    // == Clear ==
    /// Removes every entry. Statistics are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.stats.set_total_entries(0);
    }

    // == Purge Expired ==
    /// Removes all expired entries at once.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&mut self) -> usize {
        let ttl = self.ttl;
        if ttl.is_none() {
            return 0;
        }

        let expired_keys: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(ttl))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.remove_entry(key);
            self.stats.record_expiration();
        }

        expired_keys.len()
    }

    // == Accessors ==
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    /// Returns current store statistics.
    pub fn stats(&self) -> StoreStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    /// Number of physically present entries, including expired ones not yet
    /// observed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove_entry(&mut self, key: &K) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.remove(key);
            self.stats.set_total_entries(self.entries.len());
            true
        } else {
            false
        }
    }
}
