//! Deferred Expiry Check
//!
//! Lazy expiry only clears an entry when its key is looked at again. A key
//! that is written once and never read would linger, so every TTL write also
//! schedules one re-check of that key when its TTL has elapsed.

use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::store::{SharedStore, TtlStore};
use crate::tasks::start_after;

/// Writes `value` under `key` and, when the store has a TTL, schedules the
/// re-check of that key.
///
/// Returns the key evicted to make room, if any.
pub fn set_with_expiry<K, V>(store: &SharedStore<K, V>, key: K, value: V) -> Option<K>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    let (evicted, ttl) = {
        let mut guard = store.lock();
        let evicted = guard.set(key.clone(), value);
        (evicted, guard.ttl())
    };

    if let Some(ttl) = ttl {
        schedule_expiry_check(Arc::downgrade(store), key, ttl);
    }

    evicted
}

/// Spawns a one-shot task that looks at `key` after `ttl`, dropping the
/// entry if it has expired by then.
///
/// The task holds the store weakly: a store that was discarded in the
/// meantime is not kept alive. Outside a tokio runtime nothing is scheduled
/// and lazy expiry alone applies.
pub fn schedule_expiry_check<K, V>(
    store: Weak<Mutex<TtlStore<K, V>>>,
    key: K,
    ttl: Duration,
) -> Option<JoinHandle<()>>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    Handle::try_current().ok()?;

    Some(start_after(ttl, async move {
        if let Some(store) = store.upgrade() {
            let live = store.lock().contains(&key);
            trace!(live, "deferred expiry check");
        }
    }))
}
