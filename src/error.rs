//! Error types for memoization, task pools and check chains
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Key Error ==
/// Failure to bind a call's arguments to a function signature.
///
/// Fatal to the call that produced it; nothing is cached.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// More positional arguments than formal parameters
    #[error("too many positional arguments: {given} given, {expected} expected")]
    TooManyArguments { given: usize, expected: usize },

    /// Named argument that is not a formal parameter
    #[error("unknown argument: {0}")]
    UnknownArgument(String),

    /// Parameter bound both by position and by name
    #[error("argument bound twice: {0}")]
    DuplicateArgument(String),

    /// The scope parameter was bound to something other than a scope handle
    #[error("argument {0} is not a scope handle")]
    NotAScope(String),
}

// == Call Error ==
/// Failure of a memoized call.
#[derive(Error, Debug)]
pub enum CallError<E> {
    /// The arguments could not be turned into a cache key
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The wrapped function failed; its error is passed through unmodified
    #[error("computation failed: {0}")]
    Computation(E),

    /// A blocking computation panicked on its worker thread
    #[error("computation panicked: {0}")]
    Panicked(String),

    /// The blocking entry point was used with an async computation
    #[error("async computations cannot be called from a blocking context")]
    WrongKind,
}

impl<E> CallError<E> {
    /// Returns the wrapped function's error, if that is what failed.
    pub fn into_computation(self) -> Option<E> {
        match self {
            CallError::Computation(err) => Some(err),
            _ => None,
        }
    }
}

// == Task Error ==
/// Failure outcome of a task run by a pool.
#[derive(Error, Debug)]
pub enum TaskError<E> {
    /// The task returned an error
    #[error("task failed: {0}")]
    Failed(E),

    /// The task panicked
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was aborted before finishing
    #[error("task cancelled")]
    Cancelled,
}

impl<E> From<tokio::task::JoinError> for TaskError<E> {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            TaskError::Cancelled
        } else {
            TaskError::Panicked(panic_message(err))
        }
    }
}

// == Guard Error ==
/// Every applicable check refused the request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("access denied: {}", .0.join(" | "))]
    Denied(Vec<String>),
}

/// Extracts a printable message from a failed join.
pub(crate) fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }

    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

// == Result Type Alias ==
/// Convenience Result type for key derivation.
pub type Result<T> = std::result::Result<T, KeyError>;
