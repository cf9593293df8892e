//! Cancelable waiting between retry attempts.
//!
//! Enables fast, deterministic tests without real time delays. Every wait honors a
//! [`CancellationToken`]: it returns early with [`Canceled`] once the token fires.

use crate::error::Canceled;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Granularity of the blocking wait's cancellation checks.
const BLOCKING_SLICE: Duration = Duration::from_millis(10);

/// Abstraction for sleeping/waiting
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    /// Wait asynchronously for `duration` unless `token` is canceled first.
    fn sleep(
        &self,
        duration: Duration,
        token: &CancellationToken,
    ) -> BoxFuture<'static, Result<(), Canceled>>;

    /// Block the calling thread for `duration` unless `token` is canceled first.
    fn sleep_blocking(&self, duration: Duration, token: &CancellationToken)
        -> Result<(), Canceled>;
}

/// Production sleeper using the tokio timer for async waits and the thread for blocking ones.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(
        &self,
        duration: Duration,
        token: &CancellationToken,
    ) -> BoxFuture<'static, Result<(), Canceled>> {
        let token = token.clone();
        Box::pin(async move {
            if duration.is_zero() {
                return if token.is_cancelled() { Err(Canceled) } else { Ok(()) };
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(Canceled),
                _ = tokio::time::sleep(duration) => Ok(()),
            }
        })
    }

    fn sleep_blocking(
        &self,
        duration: Duration,
        token: &CancellationToken,
    ) -> Result<(), Canceled> {
        let deadline = Instant::now() + duration;
        loop {
            if token.is_cancelled() {
                return Err(Canceled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(BLOCKING_SLICE));
        }
    }
}

/// Test sleeper that doesn't actually sleep
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(
        &self,
        _duration: Duration,
        token: &CancellationToken,
    ) -> BoxFuture<'static, Result<(), Canceled>> {
        let canceled = token.is_cancelled();
        Box::pin(async move { if canceled { Err(Canceled) } else { Ok(()) } })
    }

    fn sleep_blocking(
        &self,
        _duration: Duration,
        token: &CancellationToken,
    ) -> Result<(), Canceled> {
        if token.is_cancelled() {
            Err(Canceled)
        } else {
            Ok(())
        }
    }
}

/// Test sleeper that tracks all sleep calls
#[derive(Debug, Clone, Default)]
pub struct TrackingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    /// New tracker with no recorded calls.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every requested duration, in call order.
    pub fn calls(&self) -> Vec<Duration> {
        self.lock().clone()
    }

    /// Forget recorded calls.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Duration>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, duration: Duration, token: &CancellationToken) -> Result<(), Canceled> {
        self.lock().push(duration);
        if token.is_cancelled() {
            Err(Canceled)
        } else {
            Ok(())
        }
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(
        &self,
        duration: Duration,
        token: &CancellationToken,
    ) -> BoxFuture<'static, Result<(), Canceled>> {
        let outcome = self.record(duration, token);
        Box::pin(async move { outcome })
    }

    fn sleep_blocking(
        &self,
        duration: Duration,
        token: &CancellationToken,
    ) -> Result<(), Canceled> {
        self.record(duration, token)
    }
}
