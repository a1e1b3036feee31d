//! Memo Module
//!
//! Single-flight memoization: key derivation, per-key concurrency gates,
//! per-scope private caches and notifier-driven invalidation.

mod gate;
mod key;
mod memoizer;
mod notifier;
mod scope;

pub use gate::{ConcurrencyGate, GatePass, GateTicket};
pub use key::{ArgValue, CacheKey, CallArgs, DerivedKey, KeyDeriver, Signature, DEFAULT_EXCLUDED};
pub use memoizer::{Computation, MemoStats, Memoizer};
pub use notifier::Notifier;
pub use scope::{Scope, ScopeId, ScopeRegistry};
