//! Integration Tests for the Memoizer
//!
//! Exercises single-flight collapse, key selection, expiry, eviction,
//! invalidation and scoping through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flightcache::memo::ArgValue;
use flightcache::{CallArgs, CallError, Computation, MemoConfig, Memoizer, Notifier, Scope, Signature};
use futures::future::join_all;
use parking_lot::Mutex;

// == Helper Functions ==

/// Memoizer over `fetch(self, id, verbose)` that counts its invocations and
/// takes `delay` to answer.
fn fetch_memo(config: MemoConfig, delay: Duration) -> (Memoizer<String, String>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let memo = Memoizer::new(
        "fetch",
        Signature::new(["self", "id", "verbose"]),
        &config,
        Computation::from_async(move |args: CallArgs| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(delay).await;
                Ok(format!("{}#{}", id_of(&args, 1), n))
            }
        }),
    );
    (memo, calls)
}

fn id_of(args: &CallArgs, position: usize) -> String {
    match args.positional().get(position) {
        Some(ArgValue::Value(value)) => value.to_string(),
        _ => "-".to_string(),
    }
}

fn args(id: u64) -> CallArgs {
    CallArgs::new().arg("svc").arg(id)
}

// == Single Flight ==

#[tokio::test(start_paused = true)]
async fn test_concurrent_identical_calls_collapse() {
    let (memo, calls) = fetch_memo(MemoConfig::new(), Duration::from_millis(50));

    let results = join_all((0..10).map(|_| memo.call(args(1)))).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let values: Vec<String> = results.into_iter().map(Result::unwrap).collect();
    assert!(values.iter().all(|v| v == "1#1"));
    assert_eq!(memo.stats().computations, 1);
    assert_eq!(memo.stats().hits, 9);
    assert_eq!(memo.stats().gates, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_collapse_across_spawned_tasks() {
    let (memo, calls) = fetch_memo(MemoConfig::new(), Duration::from_millis(50));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let memo = memo.clone();
            tokio::spawn(async move { memo.call(args(7)).await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "7#1");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_gate_capacity_allows_parallel_duplicates() {
    let (memo, calls) = fetch_memo(MemoConfig::new().concurrency(3), Duration::from_millis(50));

    join_all((0..3).map(|_| memo.call(args(1)))).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Later calls are served from the cache
    memo.call(args(1)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_blocking_computation_collapses() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let memo: Memoizer<u64, String> = Memoizer::new(
        "square",
        Signature::new(["n"]),
        &MemoConfig::new(),
        Computation::from_blocking(move |args: CallArgs| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            match args.positional().first() {
                Some(ArgValue::Value(value)) => Ok(value.as_u64().unwrap_or(0).pow(2)),
                _ => Err("missing n".to_string()),
            }
        }),
    );

    let results = join_all((0..8).map(|_| memo.call(CallArgs::new().arg(9)))).await;

    assert!(results.into_iter().all(|r| r.unwrap() == 81));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_blocking_call_site_collapses_across_threads() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let memo: Memoizer<u64, String> = Memoizer::new(
        "square",
        Signature::new(["n"]),
        &MemoConfig::new(),
        Computation::from_blocking(move |args: CallArgs| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            match args.positional().first() {
                Some(ArgValue::Value(value)) => Ok(value.as_u64().unwrap_or(0).pow(2)),
                _ => Err("missing n".to_string()),
            }
        }),
    );

    let threads = 8;
    let barrier = Arc::new(std::sync::Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let memo = memo.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                memo.call_blocking(CallArgs::new().arg(6))
            })
        })
        .collect();

    let results: Vec<u64> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap().unwrap())
        .collect();

    assert_eq!(results, vec![36; threads]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(memo.stats().hits, (threads - 1) as u64);
    assert_eq!(memo.stats().gates, 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_ttl_and_capacity_still_collapse() {
    let config = MemoConfig::new().ttl(Duration::ZERO).max_entries(0);
    let (memo, calls) = fetch_memo(config, Duration::from_millis(20));

    let results = join_all((0..5).map(|_| memo.call(args(1)))).await;

    assert!(results.iter().all(|r| matches!(r, Ok(value) if value == "1#1")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(memo.ttl(), None);
    assert_eq!(memo.max_entries(), None);
}

// == Cancellation ==

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_caller_keeps_blocking_computation_exclusive() {
    let calls = Arc::new(AtomicUsize::new(0));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (counter, active, highest) = (Arc::clone(&calls), Arc::clone(&running), Arc::clone(&peak));
    let memo: Memoizer<u64, String> = Memoizer::new(
        "slow",
        Signature::new(["n"]),
        &MemoConfig::new(),
        Computation::from_blocking(move |args: CallArgs| {
            counter.fetch_add(1, Ordering::SeqCst);
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            highest.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            active.fetch_sub(1, Ordering::SeqCst);
            match args.positional().first() {
                Some(ArgValue::Value(value)) => Ok(value.as_u64().unwrap_or(0)),
                _ => Err("missing n".to_string()),
            }
        }),
    );

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), memo.call(CallArgs::new().arg(1))).await;
    assert!(abandoned.is_err());

    // The second caller waits for the first computation instead of starting one
    let value = memo.call(CallArgs::new().arg(1)).await.unwrap();

    assert_eq!(value, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_caller_leaves_async_computation_running() {
    let (memo, calls) = fetch_memo(MemoConfig::new(), Duration::from_millis(100));

    let abandoned = tokio::time::timeout(Duration::from_millis(10), memo.call(args(1))).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(memo.store_stats().total_entries, 1);

    assert_eq!(memo.call(args(1)).await.unwrap(), "1#1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(memo.stats().gates, 0);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_computation_is_reported_and_not_cached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let memo: Memoizer<u32, String> = Memoizer::new(
        "fragile",
        Signature::new(["id"]),
        &MemoConfig::new(),
        Computation::from_async(move |_args: CallArgs| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt == 1 {
                    panic!("first attempt blew up");
                }
                Ok(7)
            }
        }),
    );

    let err = memo.call(CallArgs::new().arg(1)).await.unwrap_err();
    assert!(matches!(err, CallError::Panicked(_)));

    assert_eq!(memo.call(CallArgs::new().arg(1)).await.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(memo.stats().gates, 0);
}

// == Failure Semantics ==

#[tokio::test(start_paused = true)]
async fn test_failures_are_not_cached_and_each_waiter_retries() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let memo: Memoizer<u32, String> = Memoizer::new(
        "flaky",
        Signature::new(["id"]),
        &MemoConfig::new(),
        Computation::from_async(move |_args: CallArgs| {
            let counter = Arc::clone(&counter);
            async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(10)).await;
                if attempt <= 2 {
                    Err(format!("attempt {} failed", attempt))
                } else {
                    Ok(attempt as u32)
                }
            }
        }),
    );

    let results = join_all((0..3).map(|_| memo.call(CallArgs::new().arg(1)))).await;

    let errors: Vec<String> = results
        .iter()
        .filter_map(|r| match r {
            Err(CallError::Computation(msg)) => Some(msg.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(errors, vec!["attempt 1 failed", "attempt 2 failed"]);
    assert_eq!(results[2].as_ref().unwrap(), &3);

    // The success is cached now
    assert_eq!(memo.call(CallArgs::new().arg(1)).await.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(memo.stats().failures, 2);
}

// == Key Selection ==

#[tokio::test]
async fn test_excluded_argument_shares_entry() {
    let config = MemoConfig::new().exclude_args(["self", "verbose"]);
    let (memo, calls) = fetch_memo(config, Duration::ZERO);

    let a = memo.call(args(1).arg(true)).await.unwrap();
    let b = memo
        .call(CallArgs::new().arg("other").arg(1).named("verbose", false))
        .await
        .unwrap();

    assert_eq!(a, b);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_included_argument_separates_entries() {
    let config = MemoConfig::new().include_args(["id"]);
    let (memo, calls) = fetch_memo(config, Duration::ZERO);

    memo.call(args(1)).await.unwrap();
    memo.call(args(2)).await.unwrap();
    memo.call(args(1).arg(true)).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// == Expiry and Eviction ==

#[tokio::test(start_paused = true)]
async fn test_ttl_expiry_triggers_one_recomputation() {
    let config = MemoConfig::new().ttl(Duration::from_millis(100));
    let (memo, calls) = fetch_memo(config, Duration::ZERO);

    memo.call(args(1)).await.unwrap();

    tokio::time::advance(Duration::from_millis(50)).await;
    assert_eq!(memo.call(args(1)).await.unwrap(), "1#1");

    tokio::time::advance(Duration::from_millis(100)).await;
    assert_eq!(memo.call(args(1)).await.unwrap(), "1#2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_fifo_eviction_ignores_reads() {
    let config = MemoConfig::new().max_entries(2);
    let (memo, calls) = fetch_memo(config, Duration::ZERO);

    memo.call(args(1)).await.unwrap(); // A
    memo.call(args(2)).await.unwrap(); // B
    memo.call(args(1)).await.unwrap(); // read A, served from cache
    memo.call(args(3)).await.unwrap(); // C evicts A
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    memo.call(args(2)).await.unwrap();
    memo.call(args(3)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    memo.call(args(1)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(memo.store_stats().evictions, 2);
}

// == Invalidation ==

#[tokio::test]
async fn test_invalidate_and_invalidate_all() {
    let (memo, calls) = fetch_memo(MemoConfig::new(), Duration::ZERO);

    memo.call(args(1)).await.unwrap();
    memo.call(args(2)).await.unwrap();

    assert!(memo.invalidate(&args(1)).unwrap());
    memo.call(args(1)).await.unwrap();
    memo.call(args(2)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    memo.invalidate_all();
    memo.call(args(1)).await.unwrap();
    memo.call(args(2)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_notifier_invalidates_subscribed_memoizers() {
    let notifier: Notifier<CallArgs> = Notifier::new();
    let (first, first_calls) = fetch_memo(MemoConfig::new(), Duration::ZERO);
    let (second, second_calls) = fetch_memo(MemoConfig::new(), Duration::ZERO);
    let first = first.with_notifier(&notifier);
    let second = second.with_notifier(&notifier);

    first.call(args(1)).await.unwrap();
    second.call(args(1)).await.unwrap();
    second.call(args(2)).await.unwrap();

    assert_eq!(notifier.notify(&args(1)), 2);

    first.call(args(1)).await.unwrap();
    second.call(args(1)).await.unwrap();
    second.call(args(2)).await.unwrap();
    assert_eq!(first_calls.load(Ordering::SeqCst), 2);
    assert_eq!(second_calls.load(Ordering::SeqCst), 3);

    // An event binding no key parameter flushes everything
    notifier.notify(&CallArgs::new().arg("svc"));
    second.call(args(2)).await.unwrap();
    assert_eq!(second_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_notifier_outlives_dropped_memoizer() {
    let notifier: Notifier<CallArgs> = Notifier::new();
    let (memo, _) = fetch_memo(MemoConfig::new(), Duration::ZERO);
    let memo = memo.with_notifier(&notifier);
    drop(memo);

    assert_eq!(notifier.notify(&args(1)), 1);
}

// == Scoping ==

fn session_memo() -> (Memoizer<String, String>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let memo = Memoizer::new(
        "profile",
        Signature::new(["session", "id"]),
        &MemoConfig::new().scope_param("session"),
        Computation::from_async(move |args: CallArgs| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(format!("{}#{}", id_of(&args, 1), n))
            }
        }),
    );
    (memo, calls)
}

#[tokio::test]
async fn test_scopes_do_not_share_entries() {
    let (memo, calls) = session_memo();
    let alice = Scope::new();
    let bob = Scope::new();

    let a1 = memo.call(CallArgs::new().scope(&alice).arg(1)).await.unwrap();
    let b1 = memo.call(CallArgs::new().scope(&bob).arg(1)).await.unwrap();
    assert_ne!(a1, b1);

    let a2 = memo.call(CallArgs::new().scope(&alice).arg(1)).await.unwrap();
    let b2 = memo
        .call(CallArgs::new().named_scope("session", &bob).named("id", 1))
        .await
        .unwrap();
    assert_eq!(a1, a2);
    assert_eq!(b1, b2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Unscoped calls use the shared store
    memo.call(CallArgs::new().named("id", 1)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(memo.store_stats().total_entries, 1);
}

#[tokio::test]
async fn test_scope_store_is_released_with_scope() {
    let (memo, _) = session_memo();
    let alice = Scope::new();
    let bob = Scope::new();

    memo.call(CallArgs::new().scope(&alice).arg(1)).await.unwrap();
    memo.call(CallArgs::new().scope(&bob).arg(1)).await.unwrap();
    assert_eq!(memo.scope_count(), 2);

    drop(alice);

    assert_eq!(memo.scope_count(), 1);
    assert!(memo.scope_stats(&bob).is_some());
}

#[tokio::test]
async fn test_scoped_invalidation_stays_in_scope() {
    let (memo, calls) = session_memo();
    let alice = Scope::new();
    let bob = Scope::new();

    for scope in [&alice, &bob] {
        memo.call(CallArgs::new().scope(scope).arg(1)).await.unwrap();
        memo.call(CallArgs::new().scope(scope).arg(2)).await.unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    assert!(memo
        .invalidate(&CallArgs::new().scope(&alice).arg(1))
        .unwrap());
    memo.call(CallArgs::new().scope(&alice).arg(1)).await.unwrap();
    memo.call(CallArgs::new().scope(&bob).arg(1)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    assert!(memo.invalidate_scope(&bob));
    memo.call(CallArgs::new().scope(&alice).arg(2)).await.unwrap();
    memo.call(CallArgs::new().scope(&bob).arg(2)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_scope_parameter_with_plain_value_is_rejected() {
    let (memo, calls) = session_memo();

    let err = memo
        .call(CallArgs::new().arg("not-a-scope").arg(1))
        .await
        .unwrap_err();

    assert!(matches!(err, CallError::Key(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cached_scopes_are_released_with_their_owner() {
    let next = Arc::new(Mutex::new(None::<Scope>));
    let source = Arc::clone(&next);
    let memo: Memoizer<Scope, String> = Memoizer::new(
        "child",
        Signature::new(["session", "id"]),
        &MemoConfig::new().scope_param("session"),
        Computation::from_async(move |_args: CallArgs| {
            let child = source.lock().take().unwrap_or_default();
            async move { Ok(child) }
        }),
    );

    // Each owner caches the only remaining handle of a child scope that has
    // a private store of its own
    let mut owners = Vec::new();
    for _ in 0..2 {
        let child = Scope::new();
        memo.call(CallArgs::new().scope(&child).arg(1)).await.unwrap();

        let owner = Scope::new();
        *next.lock() = Some(child);
        memo.call(CallArgs::new().scope(&owner).arg(1)).await.unwrap();
        owners.push(owner);
    }
    assert_eq!(memo.scope_count(), 4);

    assert!(memo.invalidate_scope(&owners[0]));
    assert_eq!(memo.scope_count(), 3);

    drop(owners);
    assert_eq!(memo.scope_count(), 0);
}
