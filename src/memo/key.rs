//! Key Derivation
//!
//! Binds a call's positional and named arguments to a function's formal
//! parameters and turns the selected subset into a canonical cache key.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde_json::Value;

use crate::error::{KeyError, Result};
use crate::memo::Scope;

/// Parameters excluded from keys unless the caller says otherwise.
pub const DEFAULT_EXCLUDED: [&str; 2] = ["self", "cls"];

// == Arguments ==
/// A single argument value.
///
/// Plain data is compared by value. Scope handles are compared by identity.
#[derive(Debug, Clone)]
pub enum ArgValue {
    Value(Value),
    Scope(Scope),
}

impl ArgValue {
    fn to_key_value(&self) -> Value {
        match self {
            ArgValue::Value(value) => value.clone(),
            ArgValue::Scope(scope) => serde_json::json!({ "$scope": scope.id() }),
        }
    }
}

/// Arguments of one call: positional first, then named.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    positional: Vec<ArgValue>,
    named: Vec<(String, ArgValue)>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(ArgValue::Value(value.into()));
        self
    }

    /// Appends a positional scope handle.
    pub fn scope(mut self, scope: &Scope) -> Self {
        self.positional.push(ArgValue::Scope(scope.clone()));
        self
    }

    /// Adds a named argument.
    pub fn named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.push((name.into(), ArgValue::Value(value.into())));
        self
    }

    /// Adds a named scope handle.
    pub fn named_scope(mut self, name: impl Into<String>, scope: &Scope) -> Self {
        self.named.push((name.into(), ArgValue::Scope(scope.clone())));
        self
    }

    pub fn positional(&self) -> &[ArgValue] {
        &self.positional
    }

    pub fn named_args(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.named.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

// == Signature ==
/// Formal parameter names of a wrapped function, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    params: Vec<String>,
}

impl Signature {
    pub fn new<I, S>(params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.iter().any(|param| param == name)
    }

    /// Binds `args` to the formal parameters.
    ///
    /// Positional arguments bind by position, named arguments by name.
    /// Parameters left unbound are simply absent from the result.
    pub fn bind<'a>(&'a self, args: &'a CallArgs) -> Result<BTreeMap<&'a str, &'a ArgValue>> {
        if args.positional.len() > self.params.len() {
            return Err(KeyError::TooManyArguments {
                given: args.positional.len(),
                expected: self.params.len(),
            });
        }

        let mut bound: BTreeMap<&str, &ArgValue> = self
            .params
            .iter()
            .map(String::as_str)
            .zip(args.positional.iter())
            .collect();

        for (name, value) in args.named_args() {
            if !self.contains(name) {
                return Err(KeyError::UnknownArgument(name.to_string()));
            }
            if bound.insert(name, value).is_some() {
                return Err(KeyError::DuplicateArgument(name.to_string()));
            }
        }

        Ok(bound)
    }
}

// == Cache Key ==
/// Canonical string form of the argument subset that identifies a result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of deriving a key for one call.
#[derive(Debug, Clone)]
pub struct DerivedKey {
    pub key: CacheKey,
    /// Scope handle bound to the scope parameter, if any
    pub scope: Option<Scope>,
    /// True when none of the key parameters were bound
    pub is_empty: bool,
}

// == Key Deriver ==
/// Selects key parameters and produces cache keys from call arguments.
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    signature: Signature,
    key_params: HashSet<String>,
    scope_param: Option<String>,
}

impl KeyDeriver {
    /// Builds a deriver.
    ///
    /// The key parameters are `include` (or every formal parameter when
    /// `include` is None), minus `exclude`, minus the scope parameter. A scope
    /// parameter that is not part of the signature is ignored.
    pub fn new(
        signature: Signature,
        include: Option<&[String]>,
        exclude: &[String],
        scope_param: Option<&str>,
    ) -> Self {
        let scope_param = scope_param
            .filter(|name| signature.contains(name))
            .map(str::to_string);

        let mut key_params: HashSet<String> = match include {
            Some(names) => names.iter().cloned().collect(),
            None => signature.params().iter().cloned().collect(),
        };
        for name in exclude {
            key_params.remove(name);
        }
        if let Some(scope) = &scope_param {
            key_params.remove(scope);
        }

        Self {
            signature,
            key_params,
            scope_param,
        }
    }

    /// Derives the cache key and the scope handle for a call.
    ///
    /// Equal argument values always yield equal keys, regardless of whether
    /// they were passed by position or by name.
    pub fn derive(&self, args: &CallArgs) -> Result<DerivedKey> {
        let bound = self.signature.bind(args)?;

        let scope = match &self.scope_param {
            Some(name) => match bound.get(name.as_str()) {
                Some(ArgValue::Scope(scope)) => Some(scope.clone()),
                Some(ArgValue::Value(_)) => return Err(KeyError::NotAScope(name.clone())),
                None => None,
            },
            None => None,
        };

        let selected: BTreeMap<&str, Value> = bound
            .into_iter()
            .filter(|(name, _)| self.key_params.contains(*name))
            .map(|(name, value)| (name, value.to_key_value()))
            .collect();

        let is_empty = selected.is_empty();
        // Maps serialize with sorted keys, so the string form is canonical
        let key = CacheKey(serde_json::to_string(&selected).unwrap_or_default());

        Ok(DerivedKey {
            key,
            scope,
            is_empty,
        })
    }
}
