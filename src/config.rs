//! Configuration Module
//!
//! Wrap options for memoizers, and the demo runner's settings loaded from
//! environment variables.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::memo::DEFAULT_EXCLUDED;

// == Memo Config ==
/// Options applied when wrapping a function in a memoizer.
///
/// Deserializable so it can live in a caller's settings file; `ttl_ms` is
/// given in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MemoConfig {
    /// Concurrent computations allowed per key
    pub concurrency: usize,
    /// Parameters forming the key, None = all
    pub include_args: Option<Vec<String>>,
    /// Parameters subtracted from the key
    pub exclude_args: Vec<String>,
    /// Entry lifetime, None = never expires by time
    #[serde(rename = "ttl_ms", deserialize_with = "deserialize_millis")]
    pub ttl: Option<Duration>,
    /// Parameter holding a scope handle, enabling per-scope caches
    pub scope_param: Option<String>,
    /// FIFO capacity bound, None = unbounded
    #[serde(deserialize_with = "deserialize_cap")]
    pub max_entries: Option<usize>,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            include_args: None,
            exclude_args: DEFAULT_EXCLUDED.iter().map(|name| name.to_string()).collect(),
            ttl: None,
            scope_param: None,
            max_entries: None,
        }
    }
}

impl MemoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn include_args<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_args = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Replaces the excluded parameters, including the default receivers.
    pub fn exclude_args<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_args = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the entry lifetime. Zero means entries never expire by time.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl).filter(|ttl| !ttl.is_zero());
        self
    }

    pub fn scope_param(mut self, name: impl Into<String>) -> Self {
        self.scope_param = Some(name.into());
        self
    }

    /// Sets the FIFO capacity bound. Zero means unbounded.
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries).filter(|&max| max > 0);
        self
    }
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis))
}

fn deserialize_cap<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<usize>::deserialize(deserializer)?.filter(|&max| max > 0))
}

// == Runner Config ==
/// Settings of the demo runner.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Concurrent computations allowed per key
    pub gate_capacity: usize,
    /// Entry lifetime in milliseconds
    pub cache_ttl_ms: u64,
    /// Maximum number of cached results
    pub max_entries: usize,
    /// Tasks allowed to run at once in the pool
    pub pool_concurrency: usize,
    /// Number of tasks the runner submits
    pub demo_tasks: usize,
    /// Interval of the expired-entry sweeper in milliseconds
    pub sweep_interval_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `GATE_CAPACITY` - Concurrent computations per key (default: 1)
    /// - `CACHE_TTL_MS` - Entry lifetime in milliseconds (default: 30000)
    /// - `MAX_ENTRIES` - Maximum cached results (default: 1000)
    /// - `POOL_CONCURRENCY` - Tasks running at once (default: 4)
    /// - `DEMO_TASKS` - Tasks to submit (default: 32)
    /// - `SWEEP_INTERVAL_MS` - Sweeper interval in milliseconds (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            gate_capacity: env_or("GATE_CAPACITY", defaults.gate_capacity),
            cache_ttl_ms: env_or("CACHE_TTL_MS", defaults.cache_ttl_ms),
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            pool_concurrency: env_or("POOL_CONCURRENCY", defaults.pool_concurrency),
            demo_tasks: env_or("DEMO_TASKS", defaults.demo_tasks),
            sweep_interval_ms: env_or("SWEEP_INTERVAL_MS", defaults.sweep_interval_ms),
        }
    }

    /// Wrap options matching these settings.
    pub fn memo_config(&self) -> MemoConfig {
        MemoConfig::new()
            .concurrency(self.gate_capacity)
            .ttl(Duration::from_millis(self.cache_ttl_ms))
            .max_entries(self.max_entries)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gate_capacity: 1,
            cache_ttl_ms: 30_000,
            max_entries: 1000,
            pool_concurrency: 4,
            demo_tasks: 32,
            sweep_interval_ms: 1000,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
