//! Scope Registry
//!
//! A [`Scope`] is a handle whose identity owns a private cache. The registry
//! is a side table from scope id to that private store. When the last clone
//! of a scope is dropped, the scope runs its disposal hooks and every
//! registry it was attached to forgets its store.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::memo::CacheKey;
use crate::store::{SharedStore, TtlStore};

/// Identity of a scope handle.
pub type ScopeId = u64;

type DisposeHook = Box<dyn FnOnce(ScopeId) + Send>;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

struct ScopeInner {
    id: ScopeId,
    hooks: Mutex<Vec<DisposeHook>>,
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        for hook in self.hooks.get_mut().drain(..) {
            hook(self.id);
        }
    }
}

// == Scope ==
/// Handle that isolates cached results to its own lifetime.
///
/// Clones share identity. Pass one as the scope argument of a memoized call
/// to get a cache private to, e.g., a session or a connection.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// Registers a hook that runs when the last clone of this scope drops.
    pub(crate) fn on_dispose(&self, hook: DisposeHook) {
        self.inner.hooks.lock().push(hook);
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Scope {}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Scope").field(&self.inner.id).finish()
    }
}

// == Scope Registry ==
type ScopeMap<V> = Mutex<HashMap<ScopeId, SharedStore<CacheKey, V>>>;

/// Side table of private stores, keyed by scope identity.
pub struct ScopeRegistry<V> {
    stores: Arc<ScopeMap<V>>,
}

impl<V> ScopeRegistry<V>
where
    V: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            stores: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the private store of `scope`, creating it with `make` on
    /// first use.
    pub fn store_for(
        &self,
        scope: &Scope,
        make: impl FnOnce() -> TtlStore<CacheKey, V>,
    ) -> SharedStore<CacheKey, V> {
        let mut stores = self.stores.lock();
        if let Some(store) = stores.get(&scope.id()) {
            return Arc::clone(store);
        }

        let store = Arc::new(Mutex::new(make()));
        stores.insert(scope.id(), Arc::clone(&store));
        drop(stores);

        let registry: Weak<ScopeMap<V>> = Arc::downgrade(&self.stores);
        scope.on_dispose(Box::new(move |id| {
            if let Some(stores) = registry.upgrade() {
                // Dropped after the lock: cached values may own other scopes
                let removed = stores.lock().remove(&id);
                drop(removed);
                debug!(scope = id, "dropped private store of disposed scope");
            }
        }));
        debug!(scope = scope.id(), "attached private store to scope");

        store
    }

    /// Returns the private store of `scope` without creating one.
    pub fn get(&self, scope: &Scope) -> Option<SharedStore<CacheKey, V>> {
        self.stores.lock().get(&scope.id()).cloned()
    }

    /// Swaps the private store of `scope` for a fresh one, if it has one.
    ///
    /// Returns true if a store was replaced.
    pub fn replace(&self, scope: &Scope, make: impl FnOnce() -> TtlStore<CacheKey, V>) -> bool {
        let fresh = Arc::new(Mutex::new(make()));
        let previous = self
            .stores
            .lock()
            .get_mut(&scope.id())
            .map(|store| std::mem::replace(store, fresh));
        previous.is_some()
    }

    /// Snapshot of every live private store.
    pub fn stores(&self) -> Vec<SharedStore<CacheKey, V>> {
        self.stores.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.stores.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.lock().is_empty()
    }
}

impl<V> Default for ScopeRegistry<V>
where
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
