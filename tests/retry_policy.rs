#![allow(missing_docs)]

mod common;

use catchpoint::{
    BoxError, CancellationToken, Delegate, ErrorContext, FailedReason, InstantSleeper, Policy,
    PolicyError, RetryDelay, RetryPolicy, TrackingSleeper,
};
use common::{Permanent, Transient};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn always_failing_delegate_records_every_attempt() {
    for n in 0..6 {
        let result = RetryPolicy::new(n).with_sleeper(InstantSleeper).execute(|| Err(Transient));
        assert_eq!(result.errors().len(), n + 1, "retry_count = {n}");
        assert!(result.is_failed());
    }
}

#[test]
fn scenario_retry_twice_then_fail() {
    let result = RetryPolicy::new(2).with_sleeper(InstantSleeper).execute(|| Err(Transient));
    assert_eq!(result.errors().len(), 3);
    assert!(result.is_failed());
    assert!(!result.is_canceled());
    assert_eq!(result.failed_reason(), FailedReason::None);
}

#[test]
fn rejected_error_skips_processors() {
    let processed = Arc::new(AtomicUsize::new(0));
    let counter = processed.clone();
    let result = RetryPolicy::new(3)
        .with_sleeper(InstantSleeper)
        .include_error::<Transient>()
        .with_error_processor(move |_e: &PolicyError| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .execute(|| Err(Permanent));

    assert!(result.error_filter_unsatisfied());
    assert!(result.is_failed());
    assert_eq!(result.errors().len(), 1);
    assert_eq!(processed.load(Ordering::SeqCst), 0);
}

#[test]
fn filter_is_reevaluated_on_each_attempt() {
    let mut calls = 0;
    let policy = RetryPolicy::new(5).with_sleeper(InstantSleeper).exclude_error::<Permanent>();
    let result = policy.execute(|| -> Result<(), BoxError> {
        calls += 1;
        if calls < 3 {
            Err(Box::new(Transient))
        } else {
            Err(Box::new(Permanent))
        }
    });

    assert_eq!(calls, 3);
    assert_eq!(result.errors().len(), 3);
    assert!(result.error_filter_unsatisfied());
}

#[test]
fn cancellation_during_processing_stops_invocations() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    let token = CancellationToken::new();

    let policy = RetryPolicy::new(10)
        .with_sleeper(InstantSleeper)
        .with_token_error_processor(|_e: &PolicyError, token: &CancellationToken| token.cancel());

    let result = policy.execute_cancelable(
        move |_t: &CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Transient)
        },
        &token,
    );

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert!(result.is_canceled());
    assert!(result.is_failed());
}

#[test]
fn linear_delays_are_requested_from_the_sleeper() {
    let sleeper = TrackingSleeper::new();
    let policy = RetryPolicy::new(3)
        .with_delay(RetryDelay::linear(Duration::from_millis(100)))
        .with_sleeper(sleeper.clone());

    let _ = policy.execute(|| Err(Transient));

    assert_eq!(
        sleeper.calls(),
        vec![Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(300)]
    );
}

#[test]
fn capped_exponential_delay() {
    let sleeper = TrackingSleeper::new();
    let delay = RetryDelay::exponential(Duration::from_millis(100))
        .with_max(Duration::from_millis(250))
        .unwrap();
    let policy = RetryPolicy::new(4).with_delay(delay).with_sleeper(sleeper.clone());
    let _ = policy.execute(|| Err(Transient));

    assert_eq!(
        sleeper.calls(),
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(250),
            Duration::from_millis(250),
        ]
    );
}

#[test]
fn custom_delay_sees_the_error() {
    let sleeper = TrackingSleeper::new();
    let delay = RetryDelay::from_fn(|attempt, error: &PolicyError| {
        if error.as_ref().is::<Transient>() {
            Duration::from_millis(attempt as u64)
        } else {
            Duration::ZERO
        }
    });
    let policy = RetryPolicy::new(2).with_delay(delay).with_sleeper(sleeper.clone());
    let _ = policy.execute(|| Err(Transient));
    assert_eq!(sleeper.calls(), vec![Duration::from_millis(1), Duration::from_millis(2)]);
}

#[test]
fn execute_with_passes_the_parameter_to_processors() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let policy = RetryPolicy::new(1)
        .with_sleeper(InstantSleeper)
        .with_param_error_processor(move |_e: &PolicyError, request_id: &u64| {
            sink.lock().unwrap().push(*request_id);
        });

    let result = policy.execute_with(42u64, |_id: &u64| Err::<u64, _>(Transient));

    assert!(result.is_failed());
    assert_eq!(*seen.lock().unwrap(), vec![42, 42]);
}

#[test]
fn context_processor_sees_param_and_attempt() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let policy = RetryPolicy::new(1).with_sleeper(InstantSleeper).with_context_error_processor(
        move |_e: &PolicyError, ctx: &ErrorContext<'_>| {
            sink.lock().unwrap().push((ctx.attempt(), ctx.param::<&str>().copied()));
        },
    );

    let _ = policy.execute_with("user-7", |_user: &&str| Err::<(), _>(Transient));

    let expected = vec![(Some(0), Some("user-7")), (Some(1), Some("user-7"))];
    assert_eq!(*seen.lock().unwrap(), expected);
}

#[tokio::test]
async fn async_value_after_retries() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let policy = RetryPolicy::new(3).with_sleeper(InstantSleeper);

    let result = policy
        .execute_value_async(
            move || {
                let counter = counter.clone();
                async move {
                    tokio::task::yield_now().await;
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Transient)
                    } else {
                        Ok("ready")
                    }
                }
            },
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.result(), Some(&"ready"));
    assert_eq!(result.errors().len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn async_execute_with_param() {
    let policy = RetryPolicy::new(1).with_sleeper(InstantSleeper);
    let result = policy
        .execute_with_async(
            String::from("payload"),
            |p: &String| {
                let len = p.len();
                async move { Ok::<_, Transient>(len) }
            },
            CancellationToken::new(),
        )
        .await;
    assert_eq!(result.result(), Some(&7));
}

#[tokio::test]
async fn async_general_form_accepts_blocking_delegates() {
    let policy = RetryPolicy::new(1).with_sleeper(InstantSleeper);
    let delegate = Delegate::blocking(|| Ok::<_, Transient>(3));
    let result = policy.execute_delegate_async(Some(delegate), CancellationToken::new()).await;
    assert_eq!(result.result(), Some(&3));
}

#[tokio::test(start_paused = true)]
async fn tokio_sleeper_waits_between_attempts() {
    let policy = RetryPolicy::new(2).with_delay(RetryDelay::constant(Duration::from_secs(5)));
    let started = tokio::time::Instant::now();

    let result = policy.execute_async(|| async { Err(Transient) }, CancellationToken::new()).await;

    assert!(result.is_failed());
    assert!(started.elapsed() >= Duration::from_secs(10));
}

#[tokio::test]
async fn policies_are_shareable_across_tasks() {
    let policy = Arc::new(RetryPolicy::new(2).with_sleeper(InstantSleeper));
    let mut handles = Vec::new();
    for i in 0..8u32 {
        let policy = policy.clone();
        handles.push(tokio::spawn(async move {
            let attempts = Arc::new(AtomicUsize::new(0));
            let result = policy
                .execute_value_async(
                    move || {
                        let attempts = attempts.clone();
                        async move {
                            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                                Err(Transient)
                            } else {
                                Ok(i)
                            }
                        }
                    },
                    CancellationToken::new(),
                )
                .await;
            result.into_result()
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), Some(i as u32));
    }
}

fn policy_with_sleepy_processor(processed: Arc<AtomicUsize>) -> RetryPolicy {
    RetryPolicy::new(1).with_sleeper(InstantSleeper).with_async_error_processor(
        move |_e: PolicyError, _token: CancellationToken| {
            let processed = processed.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                processed.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            }
        },
    )
}

#[test]
fn async_processor_with_tokio_timer_runs_on_a_blocking_call() {
    let processed = Arc::new(AtomicUsize::new(0));

    let result = policy_with_sleepy_processor(processed.clone()).execute(|| Err(Transient));

    assert!(result.is_failed());
    assert!(result.catch_block_errors().is_empty());
    assert_eq!(processed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn blocking_call_from_a_current_thread_runtime_completes() {
    let processed = Arc::new(AtomicUsize::new(0));

    let result = policy_with_sleepy_processor(processed.clone()).execute(|| Err(Transient));

    assert_eq!(result.errors().len(), 2);
    assert_eq!(processed.load(Ordering::SeqCst), 2);
}
