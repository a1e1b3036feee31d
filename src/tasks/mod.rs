//! Tasks Module
//!
//! Scheduling helpers and background work.
//!
//! # Contents
//! - Runtime: worker-thread escape hatch and deferred starts
//! - Expiry: deferred re-check that clears write-once TTL entries
//! - Interval: periodic runner that survives failed runs
//! - Pool: bounded pool reporting outcomes in completion order

mod expiry;
mod interval;
mod pool;
mod runtime;

pub use expiry::{schedule_expiry_check, set_with_expiry};
pub use interval::{spawn_interval_task, Tick};
pub use pool::{Outcome, TaskPool};
pub use runtime::{run_blocking, start_after};
