//! Invalidation Notifier
//!
//! An event source that fans one event out to every subscriber. Memoizers
//! subscribe an invalidation callback so that external code can drop cached
//! results by firing the same arguments the cached call was made with.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

type Subscriber<A> = Arc<dyn Fn(&A) + Send + Sync>;

// == Notifier ==
pub struct Notifier<A> {
    subscribers: RwLock<Vec<Subscriber<A>>>,
}

impl<A> Notifier<A> {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Adds a callback that runs on every [`notify`](Self::notify).
    pub fn subscribe(&self, callback: impl Fn(&A) + Send + Sync + 'static) {
        self.subscribers.write().push(Arc::new(callback));
    }

    /// Calls every subscriber with `event`, in subscription order.
    ///
    /// Subscribers run outside the internal lock, so a callback may itself
    /// subscribe or notify. Returns the number of subscribers called.
    pub fn notify(&self, event: &A) -> usize {
        let subscribers: Vec<Subscriber<A>> = self.subscribers.read().clone();
        for subscriber in &subscribers {
            subscriber(event);
        }
        debug!(subscribers = subscribers.len(), "notified subscribers");
        subscribers.len()
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}

impl<A> Default for Notifier<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for Notifier<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.len())
            .finish()
    }
}
