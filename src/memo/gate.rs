//! Concurrency Gate
//!
//! Maps a key to a counting semaphore that bounds how many computations for
//! that key may run at once. Semaphores are created on first use and dropped
//! as soon as nobody holds or awaits them, so the map only ever contains
//! keys with calls in progress.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

type Slots<K> = Mutex<HashMap<K, Arc<Semaphore>>>;

// == Concurrency Gate ==
#[derive(Debug)]
pub struct ConcurrencyGate<K> {
    capacity: usize,
    slots: Arc<Slots<K>>,
}

impl<K> ConcurrencyGate<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates a gate admitting `capacity` holders per key (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a ticket for `key`. The ticket does not hold a slot yet.
    pub fn ticket(&self, key: K) -> GateTicket<K> {
        let semaphore = {
            let mut slots = self.slots.lock();
            let capacity = self.capacity;
            Arc::clone(
                slots
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Semaphore::new(capacity))),
            )
        };

        GateTicket {
            slots: Arc::clone(&self.slots),
            key,
            semaphore,
        }
    }

    /// Number of keys that currently have a semaphore.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

// == Gate Ticket ==
/// A caller's claim on one key's semaphore.
///
/// Tickets own their handle on the gate, so they can be moved into spawned
/// tasks. Dropping the ticket removes the semaphore from the gate when it
/// is idle.
#[derive(Debug)]
pub struct GateTicket<K: Eq + Hash> {
    slots: Arc<Slots<K>>,
    key: K,
    semaphore: Arc<Semaphore>,
}

impl<K: Eq + Hash> GateTicket<K> {
    /// Waits cooperatively for a slot.
    pub async fn acquire(self) -> Option<GatePass<K>> {
        // The semaphore is never closed, so this only fails in theory
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok()?;
        Some(GatePass {
            permit,
            ticket: self,
        })
    }

    /// Blocks the current thread until a slot frees.
    ///
    /// Must not be called from inside the async runtime.
    pub fn acquire_blocking(self) -> Option<GatePass<K>> {
        let permit =
            futures::executor::block_on(Arc::clone(&self.semaphore).acquire_owned()).ok()?;
        Some(GatePass {
            permit,
            ticket: self,
        })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl<K: Eq + Hash> Drop for GateTicket<K> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        // Clones are only handed out under this lock: two references means
        // the map and this ticket, nobody else.
        let idle = slots.get(&self.key).is_some_and(|held| {
            Arc::ptr_eq(held, &self.semaphore) && Arc::strong_count(held) == 2
        });
        if idle {
            slots.remove(&self.key);
            trace!("removed idle gate");
        }
    }
}

// == Gate Pass ==
/// A held slot on one key's semaphore.
///
/// Dropping the pass frees the slot, then releases the ticket.
#[derive(Debug)]
pub struct GatePass<K: Eq + Hash> {
    permit: OwnedSemaphorePermit,
    ticket: GateTicket<K>,
}

impl<K: Eq + Hash> GatePass<K> {
    /// Slots of this key still free.
    pub fn available(&self) -> usize {
        self.ticket.available()
    }

    /// Frees the slot now.
    pub fn release(self) {
        let GatePass { permit, ticket } = self;
        drop(permit);
        drop(ticket);
    }
}
