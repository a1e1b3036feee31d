//! Flightcache demo runner
//!
//! Fans a batch of memoized lookups out through a bounded task pool and
//! reports how many were collapsed into a single computation.

use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flightcache::{CallArgs, Computation, Config, Memoizer, Signature, TaskPool};

/// Number of distinct keys the demo tasks spread over.
const DISTINCT_KEYS: usize = 8;

/// Main entry point for the demo runner.
///
/// # Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Wrap a slow blocking lookup in a memoizer and start its sweeper
/// 4. Submit the demo tasks through a bounded pool
/// 5. Drain the pool and log the statistics
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flightcache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Configuration loaded: gate_capacity={}, ttl={}ms, max_entries={}, pool={}, tasks={}",
        config.gate_capacity,
        config.cache_ttl_ms,
        config.max_entries,
        config.pool_concurrency,
        config.demo_tasks
    );

    let lookup: Memoizer<u64, String> = Memoizer::new(
        "slow_square",
        Signature::new(["n"]),
        &config.memo_config(),
        Computation::from_blocking(|args: CallArgs| {
            let n = match args.positional().first() {
                Some(flightcache::memo::ArgValue::Value(value)) => value.as_u64(),
                _ => None,
            };
            match n {
                Some(n) => {
                    std::thread::sleep(Duration::from_millis(50));
                    Ok(n * n)
                }
                None => Err("expected a number".to_string()),
            }
        }),
    );
    let sweeper = lookup.spawn_sweeper(Duration::from_millis(config.sweep_interval_ms));

    let mut pool: TaskPool<u64, String> = TaskPool::bounded(config.pool_concurrency);
    for i in 0..config.demo_tasks {
        let lookup = lookup.clone();
        let n = (i % DISTINCT_KEYS) as u64;
        pool.submit(async move {
            lookup
                .call(CallArgs::new().arg(n))
                .await
                .map_err(|err| err.to_string())
        })
        .await;
    }

    let outcomes = pool.finish().await;
    let failed = outcomes.iter().filter(|outcome| outcome.is_err()).count();
    if failed > 0 {
        warn!("{} of {} tasks failed", failed, outcomes.len());
    }

    let store_stats = lookup.store_stats();
    let stats = serde_json::to_string(&lookup.stats()).context("serializing memo stats")?;
    let store = serde_json::to_string(&store_stats).context("serializing store stats")?;
    info!("Memo stats: {}", stats);
    info!(
        "Store stats: {} (hit rate {:.1}%)",
        store,
        store_stats.hit_rate() * 100.0
    );

    sweeper.abort();
    info!("Demo complete");
    Ok(())
}
