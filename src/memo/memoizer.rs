//! Single-Flight Memoizer
//!
//! Wraps a computation so that calls sharing a derived key are collapsed:
//! at most `concurrency` computations per key run at once, and the first
//! successful result is served to everyone else until it expires or is
//! invalidated. Failures are never cached.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::MemoConfig;
use crate::error::{panic_message, CallError, KeyError};
use crate::memo::{
    CacheKey, CallArgs, ConcurrencyGate, DerivedKey, KeyDeriver, Notifier, Scope, ScopeId,
    ScopeRegistry, Signature,
};
use crate::store::{SharedStore, StoreStats, TtlStore};
use crate::tasks::{run_blocking, set_with_expiry, spawn_interval_task, Tick};

type AsyncFn<V, E> = dyn Fn(CallArgs) -> BoxFuture<'static, Result<V, E>> + Send + Sync;
type BlockingFn<V, E> = dyn Fn(CallArgs) -> Result<V, E> + Send + Sync;

// == Computation ==
/// The wrapped function, tagged with how it must be run.
pub enum Computation<V, E> {
    /// Awaited on the calling task
    Async(Arc<AsyncFn<V, E>>),
    /// Run on a worker thread when called from async code
    Blocking(Arc<BlockingFn<V, E>>),
}

impl<V, E> Computation<V, E> {
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        Computation::Async(Arc::new(move |args| f(args).boxed()))
    }

    pub fn from_blocking<F>(f: F) -> Self
    where
        F: Fn(CallArgs) -> Result<V, E> + Send + Sync + 'static,
    {
        Computation::Blocking(Arc::new(f))
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Computation::Blocking(_))
    }
}

impl<V, E> Clone for Computation<V, E> {
    fn clone(&self) -> Self {
        match self {
            Computation::Async(f) => Computation::Async(Arc::clone(f)),
            Computation::Blocking(f) => Computation::Blocking(Arc::clone(f)),
        }
    }
}

// == Memo Stats ==
/// Counters of one memoizer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoStats {
    /// Calls answered from the cache, including waiters served by another
    /// caller's computation
    pub hits: u64,
    /// Successful runs of the wrapped function
    pub computations: u64,
    /// Failed runs of the wrapped function
    pub failures: u64,
    /// Keys that currently have a concurrency gate
    pub gates: usize,
    /// Scopes that currently have a private store
    pub scopes: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    computations: AtomicU64,
    failures: AtomicU64,
}

/// Gate key: the same derived key in two scopes gates independently.
type GateKey = (Option<ScopeId>, CacheKey);

struct MemoInner<V, E> {
    name: String,
    computation: Computation<V, E>,
    deriver: KeyDeriver,
    ttl: Option<Duration>,
    max_entries: Option<usize>,
    /// Store shared by calls without a scope; swapped out on full flush
    global: Mutex<SharedStore<CacheKey, V>>,
    scopes: ScopeRegistry<V>,
    gate: ConcurrencyGate<GateKey>,
    counters: Counters,
}

// == Memoizer ==
/// A memoized computation. Clones share cache, gates and counters.
pub struct Memoizer<V, E> {
    inner: Arc<MemoInner<V, E>>,
}

impl<V, E> Clone for Memoizer<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, E> Memoizer<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    /// Wraps `computation`, whose formal parameters are `signature`.
    pub fn new(
        name: impl Into<String>,
        signature: Signature,
        config: &MemoConfig,
        computation: Computation<V, E>,
    ) -> Self {
        let deriver = KeyDeriver::new(
            signature,
            config.include_args.as_deref(),
            &config.exclude_args,
            config.scope_param.as_deref(),
        );

        let global = TtlStore::shared(config.ttl, config.max_entries);
        // The store resolves zero TTL and zero capacity to unbounded
        let (ttl, max_entries) = {
            let store = global.lock();
            (store.ttl(), store.max_entries())
        };

        Self {
            inner: Arc::new(MemoInner {
                name: name.into(),
                computation,
                deriver,
                ttl,
                max_entries,
                global: Mutex::new(global),
                scopes: ScopeRegistry::new(),
                gate: ConcurrencyGate::new(config.concurrency),
                counters: Counters::default(),
            }),
        }
    }

    /// Subscribes this memoizer's invalidation to `notifier`.
    ///
    /// Each event is treated like [`invalidate`](Self::invalidate) with the
    /// event's arguments. The subscription does not keep the memoizer alive.
    pub fn with_notifier(self, notifier: &Notifier<CallArgs>) -> Self {
        let weak: Weak<MemoInner<V, E>> = Arc::downgrade(&self.inner);
        notifier.subscribe(move |args| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if let Err(err) = inner.invalidate(args) {
                warn!(memo = %inner.name, "ignored invalidation: {}", err);
            }
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    // == Call ==
    /// Returns the cached result for `args`, computing it if needed.
    ///
    /// Concurrent callers with the same key wait on the key's gate and then
    /// take the result the first one stored. The computation runs in its own
    /// task that holds the gate slot until the result is stored, so a caller
    /// that is cancelled while waiting for it leaves the computation running
    /// for the others. Blocking computations run on a worker thread.
    pub async fn call(&self, args: CallArgs) -> Result<V, CallError<E>> {
        let inner = &self.inner;
        let derived = inner.deriver.derive(&args)?;
        let store = inner.store_for(derived.scope.as_ref());

        if let Some(value) = inner.lookup(&store, &derived.key) {
            return Ok(value);
        }

        let pass = inner.gate.ticket(gate_key(&derived)).acquire().await;

        // Another caller may have filled the entry while we waited
        if let Some(value) = inner.lookup(&store, &derived.key) {
            return Ok(value);
        }

        debug!(
            memo = %inner.name,
            key = %derived.key,
            blocking = inner.computation.is_blocking(),
            "computing"
        );
        let key = derived.key;
        let flight_inner = Arc::clone(inner);
        let flight = tokio::spawn(async move {
            let _pass = pass;
            let inner = flight_inner;
            let result = match &inner.computation {
                Computation::Async(f) => Ok(f(args).await),
                Computation::Blocking(f) => {
                    let f = Arc::clone(f);
                    run_blocking(move || f(args)).await
                }
            };
            match result {
                Ok(result) => inner.finish(&store, key, result),
                Err(err) => {
                    inner.counters.failures.fetch_add(1, Ordering::Relaxed);
                    Err(CallError::Panicked(panic_message(err)))
                }
            }
        });

        match flight.await {
            Ok(result) => result,
            Err(err) => Err(CallError::Panicked(panic_message(err))),
        }
    }

    /// Synchronous counterpart of [`call`](Self::call) for blocking
    /// computations. Waiters block the current thread.
    ///
    /// Must not be called from inside the async runtime.
    pub fn call_blocking(&self, args: CallArgs) -> Result<V, CallError<E>> {
        let inner = &self.inner;
        let Computation::Blocking(f) = &inner.computation else {
            return Err(CallError::WrongKind);
        };

        let derived = inner.deriver.derive(&args)?;
        let store = inner.store_for(derived.scope.as_ref());

        if let Some(value) = inner.lookup(&store, &derived.key) {
            return Ok(value);
        }

        let _pass = inner.gate.ticket(gate_key(&derived)).acquire_blocking();

        if let Some(value) = inner.lookup(&store, &derived.key) {
            return Ok(value);
        }

        debug!(memo = %inner.name, key = %derived.key, "computing on caller thread");
        let result = f(args);
        inner.finish(&store, derived.key, result)
    }

    // == Invalidation ==
    /// Drops the entry that a call with `args` would have produced.
    ///
    /// If none of the key parameters are bound, the whole targeted store
    /// (the scope's, or the shared one) is discarded. Returns true if
    /// anything was removed.
    pub fn invalidate(&self, args: &CallArgs) -> Result<bool, KeyError> {
        self.inner.invalidate(args)
    }

    /// Discards every result in the shared store.
    pub fn invalidate_all(&self) {
        self.inner.flush_global();
    }

    /// Discards every result in the private store of `scope`.
    pub fn invalidate_scope(&self, scope: &Scope) -> bool {
        self.inner.flush_scope(scope)
    }

    // == Maintenance ==
    /// Removes expired entries from the shared store and every scope store.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Spawns a background task purging expired entries every `interval`.
    ///
    /// The task stops on its own once the memoizer is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<MemoInner<V, E>> = Arc::downgrade(&self.inner);
        spawn_interval_task("memo-sweeper", interval, move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return Ok::<_, KeyError>(Tick::Stop);
                };
                let removed = inner.purge_expired();
                if removed > 0 {
                    debug!(memo = %inner.name, removed, "swept expired entries");
                }
                Ok(Tick::Continue)
            }
        })
    }

    // == Introspection ==
    pub fn stats(&self) -> MemoStats {
        let counters = &self.inner.counters;
        MemoStats {
            hits: counters.hits.load(Ordering::Relaxed),
            computations: counters.computations.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
            gates: self.inner.gate.len(),
            scopes: self.inner.scopes.len(),
        }
    }

    /// Statistics of the shared store.
    pub fn store_stats(&self) -> StoreStats {
        self.inner.global.lock().lock().stats()
    }

    /// Statistics of the private store of `scope`, if it has one.
    pub fn scope_stats(&self, scope: &Scope) -> Option<StoreStats> {
        self.inner.scopes.get(scope).map(|store| store.lock().stats())
    }

    pub fn scope_count(&self) -> usize {
        self.inner.scopes.len()
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.inner.ttl
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.inner.max_entries
    }
}

fn gate_key(derived: &DerivedKey) -> GateKey {
    (derived.scope.as_ref().map(Scope::id), derived.key.clone())
}

impl<V, E> MemoInner<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    fn new_store(&self) -> TtlStore<CacheKey, V> {
        TtlStore::new(self.ttl, self.max_entries)
    }

    fn store_for(&self, scope: Option<&Scope>) -> SharedStore<CacheKey, V> {
        match scope {
            Some(scope) => self.scopes.store_for(scope, || self.new_store()),
            None => Arc::clone(&self.global.lock()),
        }
    }

    fn lookup(&self, store: &SharedStore<CacheKey, V>, key: &CacheKey) -> Option<V> {
        let value = store.lock().get(key)?;
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        debug!(memo = %self.name, %key, "cache hit");
        Some(value)
    }

    /// Stores a successful result before the caller's gate slot is released.
    fn finish(
        &self,
        store: &SharedStore<CacheKey, V>,
        key: CacheKey,
        result: Result<V, E>,
    ) -> Result<V, CallError<E>> {
        match result {
            Ok(value) => {
                self.counters.computations.fetch_add(1, Ordering::Relaxed);
                if let Some(evicted) = set_with_expiry(store, key, value.clone()) {
                    debug!(memo = %self.name, key = %evicted, "evicted oldest entry");
                }
                Ok(value)
            }
            Err(err) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                debug!(memo = %self.name, %key, "computation failed, nothing cached");
                Err(CallError::Computation(err))
            }
        }
    }

    fn invalidate(&self, args: &CallArgs) -> Result<bool, KeyError> {
        let derived = self.deriver.derive(args)?;

        if derived.is_empty {
            return Ok(match &derived.scope {
                Some(scope) => self.flush_scope(scope),
                None => {
                    self.flush_global();
                    true
                }
            });
        }

        let store = match &derived.scope {
            Some(scope) => match self.scopes.get(scope) {
                Some(store) => store,
                None => return Ok(false),
            },
            None => Arc::clone(&self.global.lock()),
        };

        let removed = store.lock().delete(&derived.key);
        if removed {
            debug!(memo = %self.name, key = %derived.key, "invalidated entry");
        }
        Ok(removed)
    }

    fn flush_global(&self) {
        *self.global.lock() = Arc::new(Mutex::new(self.new_store()));
        debug!(memo = %self.name, "flushed shared store");
    }

    fn flush_scope(&self, scope: &Scope) -> bool {
        let replaced = self.scopes.replace(scope, || self.new_store());
        if replaced {
            debug!(memo = %self.name, scope = scope.id(), "flushed scope store");
        }
        replaced
    }

    fn purge_expired(&self) -> usize {
        let global = Arc::clone(&self.global.lock());
        let mut removed = global.lock().purge_expired();
        for store in self.scopes.stores() {
            removed += store.lock().purge_expired();
        }
        removed
    }
}
