//! Check Chains
//!
//! An ordered list of access checks over a request type. Checks that do not
//! apply to a request are skipped; the first applicable check that passes
//! admits the request. If none passes, every refusal reason is reported.

use std::fmt;

use tracing::debug;

use crate::error::GuardError;

// == Check ==
/// One way of admitting a request.
pub trait Check<R: ?Sized>: Send + Sync {
    /// Whether this check has anything to say about `request`.
    fn applicable(&self, _request: &R) -> bool {
        true
    }

    /// Admits `request`, or explains why not.
    fn verify(&self, request: &R) -> Result<(), String>;
}

/// A check built from two closures.
pub struct FnCheck<A, V> {
    applicable: A,
    verify: V,
}

impl<R, A, V> Check<R> for FnCheck<A, V>
where
    R: ?Sized,
    A: Fn(&R) -> bool + Send + Sync,
    V: Fn(&R) -> Result<(), String> + Send + Sync,
{
    fn applicable(&self, request: &R) -> bool {
        (self.applicable)(request)
    }

    fn verify(&self, request: &R) -> Result<(), String> {
        (self.verify)(request)
    }
}

/// Builds a check that applies to every request.
pub fn check_fn<R, V>(verify: V) -> FnCheck<fn(&R) -> bool, V>
where
    R: ?Sized,
    V: Fn(&R) -> Result<(), String> + Send + Sync,
{
    FnCheck {
        applicable: |_| true,
        verify,
    }
}

/// Builds a check that only applies where `applicable` says so.
pub fn check_when<R, A, V>(applicable: A, verify: V) -> FnCheck<A, V>
where
    R: ?Sized,
    A: Fn(&R) -> bool + Send + Sync,
    V: Fn(&R) -> Result<(), String> + Send + Sync,
{
    FnCheck { applicable, verify }
}

// == Check Chain ==
pub struct CheckChain<R: ?Sized> {
    checks: Vec<Box<dyn Check<R>>>,
}

impl<R: ?Sized> CheckChain<R> {
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    /// Appends a check; checks run in the order they were added.
    pub fn with(mut self, check: impl Check<R> + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Runs the chain against `request`.
    ///
    /// Stops at the first applicable check that passes. A request no check
    /// applies to is denied with no reasons.
    pub fn verify(&self, request: &R) -> Result<(), GuardError> {
        let mut reasons = Vec::new();

        for (index, check) in self.checks.iter().enumerate() {
            if !check.applicable(request) {
                continue;
            }
            match check.verify(request) {
                Ok(()) => {
                    debug!(check = index, "request admitted");
                    return Ok(());
                }
                Err(reason) => reasons.push(reason),
            }
        }

        debug!(refusals = reasons.len(), "request denied");
        Err(GuardError::Denied(reasons))
    }

    /// Runs `action` only if the chain admits `request`.
    pub fn guard<T>(&self, request: &R, action: impl FnOnce() -> T) -> Result<T, GuardError> {
        self.verify(request)?;
        Ok(action())
    }
}

impl<R: ?Sized> Default for CheckChain<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ?Sized> fmt::Debug for CheckChain<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckChain")
            .field("checks", &self.checks.len())
            .finish()
    }
}
