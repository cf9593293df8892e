#![allow(missing_docs)]

mod common;

use catchpoint::{
    CancellationToken, ConfigError, FallbackPolicy, InstantSleeper, Policy, PolicyError,
    PolicyKind, RetryPolicy, SimplePolicy, WrappedPolicyFailed,
};
use common::{Permanent, Transient};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[test]
fn each_outer_attempt_records_one_wrapped_result() {
    let inner = RetryPolicy::new(1).with_sleeper(InstantSleeper).with_policy_name("inner");
    let outer = RetryPolicy::new(2).with_sleeper(InstantSleeper).wrap_policy(inner).unwrap();

    let result = outer.execute(|| Err(Transient));

    assert!(result.is_failed());
    assert_eq!(result.wrapped_policy_results().len(), 3);
    // two delegate calls per inner run
    assert_eq!(result.errors().len(), 6);
    for wrapped in result.wrapped_policy_results() {
        assert_eq!(wrapped.kind(), PolicyKind::Retry);
        assert_eq!(wrapped.policy_name(), "inner");
        assert_eq!(wrapped.result().errors().len(), 2);
    }
}

#[test]
fn second_wrap_is_a_configuration_error() {
    let policy = SimplePolicy::new().with_policy_name("outer").wrap_policy(SimplePolicy::new());
    let err = policy.unwrap().wrap_policy(RetryPolicy::new(1)).unwrap_err();

    assert_eq!(err, ConfigError::PolicyAlreadyWrapped { policy: "outer".to_string() });
}

#[test]
fn wrapped_policy_is_reported() {
    let outer = FallbackPolicy::new().wrap_policy(SimplePolicy::new()).unwrap();
    let wrapped = outer.wrapped_policy().expect("slot is filled");
    assert_eq!(wrapped.kind(), PolicyKind::Simple);
    assert_eq!(wrapped.name(), "SimplePolicy");
}

#[test]
fn child_success_stops_the_parent() {
    let mut calls = 0;
    let inner = RetryPolicy::new(3).with_sleeper(InstantSleeper);
    let outer = RetryPolicy::new(3).with_sleeper(InstantSleeper).wrap_policy(inner).unwrap();

    let result = outer.execute_value(|| {
        calls += 1;
        if calls < 3 {
            Err(Transient)
        } else {
            Ok(calls)
        }
    });

    assert!(!result.is_failed());
    assert_eq!(result.result(), Some(&3));
    assert_eq!(result.wrapped_policy_results().len(), 1);
    assert_eq!(result.errors().len(), 2);
}

#[test]
fn child_handlers_run_inside_the_parent_attempt() {
    let child_runs = Arc::new(AtomicUsize::new(0));
    let counter = child_runs.clone();
    let inner = SimplePolicy::new().include_error::<Permanent>().with_handler_fn::<(), _>(
        move |_result| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    );
    let outer = RetryPolicy::new(2).with_sleeper(InstantSleeper).wrap_policy(inner).unwrap();

    let _ = outer.execute(|| Err(Transient));

    assert_eq!(child_runs.load(Ordering::SeqCst), 3);
}

#[test]
fn child_flagged_by_a_handler_fails_the_parent_attempt() {
    let inner = SimplePolicy::new().set_failed_if::<i32, _>(|result| result.result() == Some(&0));
    let outer = RetryPolicy::new(1).with_sleeper(InstantSleeper).wrap_policy(inner).unwrap();

    let result = outer.execute_value(|| Ok::<_, Transient>(0));

    assert!(result.is_failed());
    assert_eq!(result.wrapped_policy_results().len(), 2);
    assert!(result.wrapped_policy_results().iter().all(|w| w.result().errors().is_empty()));
    assert_eq!(result.errors().len(), 2);
    assert!(result.errors().iter().all(|e| e.is::<WrappedPolicyFailed>()));
}

#[test]
fn child_flagged_failure_is_processed_as_wrapped_policy_failed() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let inner = SimplePolicy::new().set_failed_if::<i32, _>(|_| true);
    let outer = SimplePolicy::new()
        .with_error_processor(move |error: &PolicyError| {
            sink.lock().unwrap().push(error.is::<WrappedPolicyFailed>());
        })
        .wrap_policy(inner)
        .unwrap();

    let _ = outer.execute_value(|| Ok::<_, Transient>(1));

    assert_eq!(*seen.lock().unwrap(), vec![true]);
}

#[test]
fn parameter_stays_with_the_outer_policy() {
    let outer_params = Arc::new(Mutex::new(Vec::new()));
    let inner_params = Arc::new(Mutex::new(Vec::new()));
    let (outer_sink, inner_sink) = (outer_params.clone(), inner_params.clone());

    let inner = SimplePolicy::new().exclude_error::<Permanent>().with_context_error_processor(
        move |_e: &PolicyError, ctx| {
            inner_sink.lock().unwrap().push(ctx.param::<u32>().copied());
        },
    );
    let outer = SimplePolicy::new()
        .with_param_error_processor(move |_e: &PolicyError, p: &u32| {
            outer_sink.lock().unwrap().push(*p);
        })
        .wrap_policy(inner)
        .unwrap();

    let _ = outer.execute_with(7u32, |_p: &u32| Err::<(), _>(Transient));

    assert_eq!(*inner_params.lock().unwrap(), vec![None]);
    // the inner simple policy handled the error, so the outer attempt succeeded
    assert!(outer_params.lock().unwrap().is_empty());
}

#[test]
fn retry_then_fallback_uses_the_fallback_after_exhaustion() {
    let policy = RetryPolicy::new(2)
        .with_sleeper(InstantSleeper)
        .then_fallback(FallbackPolicy::new().with_fallback_fn(|| "cached"))
        .unwrap();

    let result = policy.execute_value(|| Err::<&str, _>(Transient));

    assert_eq!(result.result(), Some(&"cached"));
    assert!(!result.is_failed());
    assert_eq!(result.errors().len(), 3);
    assert_eq!(result.wrapped_policy_results().len(), 1);
    assert!(result.wrapped_policy_results()[0].result().is_failed());
}

#[test]
fn child_cancellation_cancels_the_parent() {
    let token = CancellationToken::new();
    let inner = SimplePolicy::new()
        .with_token_error_processor(|_e: &PolicyError, token: &CancellationToken| token.cancel());
    let outer = RetryPolicy::new(5).with_sleeper(InstantSleeper).wrap_policy(inner).unwrap();

    let result =
        outer.execute_cancelable(|_t: &CancellationToken| Err::<(), _>(Transient), &token);

    assert!(result.is_canceled());
    assert_eq!(result.wrapped_policy_results().len(), 1);
    assert!(result.wrapped_policy_results()[0].result().is_canceled());
}

#[tokio::test]
async fn wrapping_works_for_async_calls() {
    let inner = RetryPolicy::new(1).with_sleeper(InstantSleeper);
    let outer = FallbackPolicy::new()
        .with_async_fallback(|_token| async { Ok::<_, Permanent>(10u16) })
        .wrap_policy(inner)
        .unwrap();

    let result = outer
        .execute_value_async(|| async { Err::<u16, _>(Transient) }, CancellationToken::new())
        .await;

    assert_eq!(result.result(), Some(&10));
    assert_eq!(result.errors().len(), 2);
}
