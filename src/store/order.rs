//! Insertion Order Module
//!
//! Tracks the order in which keys were written, for FIFO eviction.

use std::collections::VecDeque;

// == Insertion Order ==
/// Tracks write order for FIFO eviction.
///
/// Keys are stored in a VecDeque where:
/// - Front = Oldest write
/// - Back = Newest write
///
/// Reads never change the order.
#[derive(Debug)]
pub struct InsertionOrder<K> {
    /// Keys by write time
    order: VecDeque<K>,
}

impl<K> Default for InsertionOrder<K> {
    fn default() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }
}

impl<K: PartialEq> InsertionOrder<K> {
    // == Constructor ==
    /// Creates a new empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Record Write ==
    /// Marks a key as the newest write.
    ///
    /// A key that is already tracked is moved to the back, since its
    /// insertion time has been refreshed.
    pub fn record_write(&mut self, key: K) {
        self.remove(&key);
        self.order.push_back(key);
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove(&mut self, key: &K) {
        self.order.retain(|k| k != key);
    }

    // == Pop Oldest ==
    /// Returns and removes the oldest written key.
    ///
    /// Returns None if tracker is empty.
    pub fn pop_oldest(&mut self) -> Option<K> {
        self.order.pop_front()
    }

    // == Length ==
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }
}
