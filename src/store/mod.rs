//! Store Module
//!
//! Provides in-memory result storage with lazy TTL expiry and FIFO eviction.

mod entry;
mod order;
mod stats;
mod ttl;


// Re-export public types
pub use entry::CacheEntry;
pub use order::InsertionOrder;
pub use stats::StoreStats;
pub use ttl::{SharedStore, TtlStore};
