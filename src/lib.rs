//! Flightcache - single-flight memoization over a TTL cache
//!
//! Wraps sync or async computations so that concurrent calls with the same
//! key share one execution and its cached result, and runs many tasks under
//! a concurrency ceiling with a bounded pool.

pub mod config;
pub mod error;
pub mod guard;
pub mod memo;
pub mod store;
pub mod tasks;

pub use config::{Config, MemoConfig};
pub use error::{CallError, GuardError, KeyError, TaskError};
pub use memo::{CallArgs, Computation, Memoizer, Notifier, Scope, Signature};
pub use tasks::{Outcome, TaskPool};
