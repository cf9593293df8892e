//! Retry policy implementation
//!
//! Re-invokes the delegate until it succeeds, the retry budget runs out, an error escapes the
//! filter, or the call is canceled.
//!
//! Semantics:
//! - The retry count is the number of retries *beyond* the initial call: `RetryPolicy::new(2)`
//!   makes at most 3 attempts. `RetryPolicy::new(0)` makes exactly one.
//! - Every failed attempt is filtered; a rejected error stops the loop immediately with
//!   `error_filter_unsatisfied` set.
//! - Every admitted error runs the error processor pipeline with the zero-based attempt index
//!   visible through [`ErrorContext::attempt`](crate::ErrorContext::attempt).
//! - Between attempts the optional [`RetryDelay`] computes a wait for the 1-based retry number,
//!   and the [`Sleeper`] waits it out cancelably.
//! - Exhausting the budget fails the result; every attempt's error is in `errors`.
//!
//! Invariants:
//! - Attempts never exceed `retry_count + 1` for a finite budget.
//! - The delay strategy is consulted exactly once per retry.
//!
//! Example
//! ```rust
//! use catchpoint::{InstantSleeper, Policy, RetryDelay, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3)
//!     .with_delay(RetryDelay::exponential(Duration::from_millis(100)))
//!     .with_sleeper(InstantSleeper);
//!
//! let mut calls = 0;
//! let result = policy.execute_value(|| {
//!     calls += 1;
//!     if calls < 3 { Err("flaky") } else { Ok(calls) }
//! });
//! assert_eq!(result.result(), Some(&3));
//! assert_eq!(result.errors().len(), 2);
//! ```

use crate::engine::{self, AttemptFailure, Disposition, ExecMode, Invocation, Sealed, Strategy};
use crate::error::ConfigError;
use crate::fallback::FallbackPolicy;
use crate::policy::{Policy, PolicyCore, PolicyKind};
use crate::result::PolicyResult;
use crate::retry_delay::RetryDelay;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{PolicyEvent, RetryEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Retry budget beyond the initial call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCount {
    /// At most `n` retries.
    Finite(usize),
    /// Retry until success, filter rejection or cancellation.
    Infinite,
}

impl RetryCount {
    /// Whether another retry is allowed after `retries_made` retries.
    pub fn allows(self, retries_made: usize) -> bool {
        match self {
            RetryCount::Finite(limit) => retries_made < limit,
            RetryCount::Infinite => true,
        }
    }

    /// Whether the budget is unbounded.
    pub fn is_infinite(self) -> bool {
        matches!(self, RetryCount::Infinite)
    }
}

/// Retries made so far within one call.
///
/// [`RetryPolicy`] owns its context exclusively for the length of a call and advances it with
/// [`increment`](Self::increment). The type is also a standalone building block for custom retry
/// loops: when a timer or cancellation callback on another task reads or advances the count
/// while the loop runs, share it behind an `Arc` and use
/// [`increment_shared`](Self::increment_shared).
///
/// ```rust
/// use catchpoint::RetryContext;
/// use std::sync::Arc;
///
/// let ctx = Arc::new(RetryContext::new(false));
/// let watcher = ctx.clone();
/// std::thread::spawn(move || watcher.increment_shared()).join().unwrap();
/// assert_eq!(ctx.attempt_count(), 1);
/// assert!(!ctx.is_zero_retry());
/// ```
#[derive(Debug, Default)]
pub struct RetryContext {
    attempts: AtomicUsize,
    infinite: bool,
}

impl RetryContext {
    /// Fresh context for a finite or infinite budget.
    pub fn new(infinite: bool) -> Self {
        Self { attempts: AtomicUsize::new(0), infinite }
    }

    /// Retries made so far.
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }

    /// Whether no retry has been made yet.
    pub fn is_zero_retry(&self) -> bool {
        self.attempt_count() == 0
    }

    /// Whether the context belongs to an infinite budget.
    pub fn is_infinite(&self) -> bool {
        self.infinite
    }

    /// Count one retry.
    pub fn increment(&mut self) {
        *self.attempts.get_mut() += 1;
    }

    /// Count one retry through a shared reference.
    pub fn increment_shared(&self) {
        self.attempts.fetch_add(1, Ordering::AcqRel);
    }
}

/// Retry policy combining a retry budget, delay strategy and sleeper.
#[derive(Clone)]
pub struct RetryPolicy {
    core: PolicyCore,
    retry_count: RetryCount,
    delay: Option<RetryDelay>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("core", &self.core)
            .field("retry_count", &self.retry_count)
            .field("delay", &self.delay)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl RetryPolicy {
    /// Policy retrying up to `retry_count` times after the initial call.
    pub fn new(retry_count: usize) -> Self {
        Self::with_count(RetryCount::Finite(retry_count))
    }

    /// Policy retrying until success, filter rejection or cancellation.
    pub fn infinite() -> Self {
        Self::with_count(RetryCount::Infinite)
    }

    fn with_count(retry_count: RetryCount) -> Self {
        Self {
            core: PolicyCore::new(PolicyKind::Retry),
            retry_count,
            delay: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Wait between attempts according to `delay`.
    pub fn with_delay(mut self, delay: RetryDelay) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Use a custom sleeper for the waits (tests inject `InstantSleeper`/`TrackingSleeper`).
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// The configured retry budget.
    pub fn retry_count(&self) -> RetryCount {
        self.retry_count
    }

    /// The configured delay strategy.
    pub fn delay(&self) -> Option<&RetryDelay> {
        self.delay.as_ref()
    }

    /// Put this policy in `fallback`'s wrap slot: retries run first, the fallback catches what
    /// they could not fix.
    pub fn then_fallback(self, fallback: FallbackPolicy) -> Result<FallbackPolicy, ConfigError> {
        fallback.wrap_policy(self)
    }

    pub(crate) async fn run<T>(&self, inv: &mut Invocation<'_, '_, T>) -> PolicyResult<T>
    where
        T: Send + Sync + 'static,
    {
        let core = &self.core;
        let mut result = PolicyResult::new(core.name.clone());
        let mut context = RetryContext::new(self.retry_count.is_infinite());
        let started = Instant::now();

        loop {
            let retries_made = context.attempt_count();
            let error = match engine::attempt(core, inv, &mut result).await {
                Ok(value) => {
                    result.set_value(value);
                    break;
                }
                Err(AttemptFailure::Canceled) => {
                    result.set_canceled();
                    break;
                }
                Err(AttemptFailure::Failed { error, recorded }) => {
                    let disposition = engine::handle_error(
                        core,
                        &error,
                        recorded,
                        Some(retries_made),
                        inv.scope(),
                        &mut result,
                    )
                    .await;
                    match disposition {
                        Disposition::Handled => error,
                        Disposition::Canceled => {
                            result.set_canceled();
                            break;
                        }
                        Disposition::Rejected | Disposition::SaverFailed => break,
                    }
                }
            };

            if inv.token.is_cancelled() {
                result.set_canceled();
                break;
            }

            if !self.retry_count.allows(retries_made) {
                let total_attempts = retries_made + 1;
                tracing::warn!(policy = %core.name, total_attempts, "retries exhausted");
                result.set_failed();
                core.emit(PolicyEvent::Retry(RetryEvent::Exhausted {
                    total_attempts,
                    total_duration: started.elapsed(),
                }))
                .await;
                break;
            }

            let retry = retries_made + 1;
            let delay = self.delay.as_ref().map_or(Duration::ZERO, |d| d.delay(retry, &error));
            tracing::debug!(policy = %core.name, retry, ?delay, error = %error, "retrying");
            core.emit(PolicyEvent::Retry(RetryEvent::Attempt { attempt: retry, delay })).await;

            if self.delay.is_some() {
                let waited = match inv.mode {
                    ExecMode::Blocking => self.sleeper.sleep_blocking(delay, inv.token),
                    ExecMode::Async => self.sleeper.sleep(delay, inv.token).await,
                };
                if waited.is_err() {
                    tracing::debug!(policy = %core.name, retry, "retry wait canceled");
                    result.set_canceled();
                    break;
                }
            }
            context.increment();
        }
        result
    }
}

impl Sealed for RetryPolicy {
    fn strategy(&self) -> Strategy<'_> {
        Strategy::Retry(self)
    }
}

impl Policy for RetryPolicy {
    fn core(&self) -> &PolicyCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PolicyCore {
        &mut self.core
    }
}
