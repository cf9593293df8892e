#![allow(missing_docs)]

mod common;

use catchpoint::{
    BridgeDirection, BridgeError, BoxError, CancellationToken, CatchBlockSource, FailedReason,
    FallbackPolicy, Policy,
};
use common::{Permanent, Transient};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn scenario_fallback_supplies_the_value() {
    let policy = FallbackPolicy::new().with_fallback_fn(|| 42);

    let result = policy.execute_value(|| Err::<i32, _>(Transient));

    assert_eq!(result.result(), Some(&42));
    assert!(!result.is_failed());
    assert_eq!(result.errors().len(), 1);
    assert!(result.errors()[0].is::<Transient>());
}

#[test]
fn fallback_is_not_called_on_success() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let policy = FallbackPolicy::new().with_fallback_fn(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        0
    });

    let result = policy.execute_value(|| Ok::<_, Transient>(7));

    assert_eq!(result.result(), Some(&7));
    assert!(result.no_error());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn fallback_failure_is_a_critical_catch_block_error() {
    let policy = FallbackPolicy::new()
        .with_fallback(|_token: &CancellationToken| Err::<String, _>(Permanent));

    let result = policy.execute_value(|| Err::<String, _>(Transient));

    assert!(result.is_failed());
    assert!(result.result().is_none());
    assert_eq!(result.failed_reason(), FailedReason::PolicyProcessorFailed);
    assert_eq!(result.catch_block_errors().len(), 1);
    let catch = &result.catch_block_errors()[0];
    assert!(catch.is_critical());
    assert_eq!(catch.source(), CatchBlockSource::PolicyRule);
    assert!(result.unprocessed_error().is_some_and(|e| e.is::<Permanent>()));
    assert!(result.critical_error().is_none());
}

#[test]
fn fallbacks_are_chosen_by_value_type() {
    let policy =
        FallbackPolicy::new().with_fallback_fn(|| 1u8).with_fallback_fn(|| "text".to_string());

    let number = policy.execute_value(|| Err::<u8, _>(Transient));
    let text = policy.execute_value(|| Err::<String, _>(Transient));
    let missing = policy.execute_value(|| Err::<u64, _>(Transient));

    assert_eq!(number.result(), Some(&1));
    assert_eq!(text.result().map(String::as_str), Some("text"));
    assert!(missing.result().is_none());
    assert!(!missing.is_failed());
}

#[test]
fn blocking_call_bridges_to_an_async_fallback() {
    let policy =
        FallbackPolicy::new().with_async_fallback(|_token| async { Ok::<_, BoxError>(5u32) });
    assert!(policy.has_fallback::<u32>());
    assert!(policy.has_async_fallback::<u32>());

    let result = policy.execute_value(|| Err::<u32, _>(Transient));

    assert_eq!(result.result(), Some(&5));
    assert!(result.critical_error().is_none());
}

fn sleepy_fallback_policy() -> FallbackPolicy {
    FallbackPolicy::new().with_async_fallback(|_token| async {
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok::<_, BoxError>(5u32)
    })
}

#[test]
fn bridged_async_fallback_can_use_tokio_timers_without_a_runtime() {
    let result = sleepy_fallback_policy().execute_value(|| Err::<u32, _>(Transient));

    assert_eq!(result.result(), Some(&5));
    assert!(!result.is_failed());
}

#[test]
fn bridged_async_fallback_inside_a_current_thread_runtime() {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

    let result = runtime.block_on(async {
        sleepy_fallback_policy().execute_value(|| Err::<u32, _>(Transient))
    });

    assert_eq!(result.result(), Some(&5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bridged_async_fallback_inside_a_multi_thread_runtime() {
    let result = sleepy_fallback_policy().execute_value(|| Err::<u32, _>(Transient));

    assert_eq!(result.result(), Some(&5));
}

#[tokio::test]
async fn failed_async_over_sync_bridge_reports_direction() {
    let policy = FallbackPolicy::new()
        .with_fallback(|_token: &CancellationToken| Err::<u32, _>(Permanent));

    let result = policy
        .execute_value_async(|| async { Err::<u32, _>(Transient) }, CancellationToken::new())
        .await;

    assert!(result.is_failed());
    let critical = result.critical_error().expect("bridged failure");
    let bridge = critical.downcast_ref::<BridgeError>().expect("bridge error");
    assert_eq!(bridge.direction(), BridgeDirection::AsyncOverSync);
    assert!(bridge.inner().is::<Permanent>());
}

#[tokio::test]
async fn async_call_prefers_the_async_fallback() {
    let policy = FallbackPolicy::new()
        .with_fallback_fn(|| "sync")
        .with_async_fallback(|_token| async { Ok::<_, BoxError>("async") });

    let result = policy
        .execute_value_async(|| async { Err::<&str, _>(Transient) }, CancellationToken::new())
        .await;
    assert_eq!(result.result(), Some(&"async"));

    let blocking = policy.execute_value(|| Err::<&str, _>(Transient));
    assert_eq!(blocking.result(), Some(&"sync"));
}

#[test]
fn token_aware_fallback_sees_the_call_token() {
    let token = CancellationToken::new();
    let policy = FallbackPolicy::new().with_fallback(|token: &CancellationToken| {
        if token.is_cancelled() {
            Err(Permanent)
        } else {
            Ok(1)
        }
    });

    let result = policy.execute_cancelable(
        |_t: &CancellationToken| Err::<i32, _>(Transient),
        &token,
    );
    assert_eq!(result.result(), Some(&1));
}

#[test]
fn rejected_error_never_reaches_the_fallback() {
    let policy = FallbackPolicy::new().exclude_error::<Permanent>().with_fallback_fn(|| 9);

    let result = policy.execute_value(|| Err::<i32, _>(Permanent));

    assert!(result.is_failed());
    assert!(result.error_filter_unsatisfied());
    assert!(result.result().is_none());
}
