//! Cache Entry Module
//!
//! Defines a single stored result together with its insertion time.

use std::time::Duration;

use tokio::time::Instant;

// == Cache Entry ==
/// Represents a single cache entry with value and insertion timestamp.
///
/// The entry does not know its own TTL; the owning store applies one TTL to
/// every entry it holds.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// When the value was written
    pub inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new entry stamped with the current time.
    pub fn new(value: V) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
        }
    }

    // == Age ==
    /// Time elapsed since the entry was written.
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.inserted_at)
    }

    // == Is Expired ==
    /// Checks if the entry has outlived `ttl`.
    ///
    /// Boundary condition: an entry whose age is exactly `ttl` is expired.
    /// With no TTL the entry never expires by time.
    pub fn is_expired(&self, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => self.age() >= ttl,
            None => false,
        }
    }
}
