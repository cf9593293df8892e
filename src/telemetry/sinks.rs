use super::events::{ErrorEvent, FallbackEvent, PolicyEvent, RequestOutcome, RetryEvent};
use crate::error::BoxError;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceExt};

/// Type-erased sink stored by a configured policy.
pub type PolicySink = BoxCloneSyncService<PolicyEvent, (), BoxError>;

/// Erase a sink so policies can hold any of them.
pub fn boxed_sink<S>(sink: S) -> PolicySink
where
    S: Service<PolicyEvent, Response = ()> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
{
    BoxCloneSyncService::new(sink.map_err(Into::into))
}

/// Deliver `event` once the sink is ready; readiness and call failures are dropped.
pub async fn emit_best_effort<S>(sink: S, event: PolicyEvent)
where
    S: Service<PolicyEvent, Response = ()> + Send,
    S::Future: Send,
{
    match sink.ready_oneshot().await {
        Ok(mut sink) => {
            if sink.call(event).await.is_err() {
                tracing::trace!("telemetry sink rejected an event");
            }
        }
        Err(_) => tracing::trace!("telemetry sink was not ready"),
    }
}

/// Discards every event.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<PolicyEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: PolicyEvent) -> Self::Future {
        ready(Ok(()))
    }
}

/// Writes events to `tracing`: failures at `warn`, everything else at `debug`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl LogSink {
    fn is_failure(event: &PolicyEvent) -> bool {
        matches!(
            event,
            PolicyEvent::Retry(RetryEvent::Exhausted { .. })
                | PolicyEvent::Fallback(FallbackEvent::Failed { .. })
                | PolicyEvent::Error(ErrorEvent::CatchBlock { critical: true, .. })
                | PolicyEvent::Request(RequestOutcome::Failure { .. })
        )
    }
}

impl Service<PolicyEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        let kind = event.kind();
        if Self::is_failure(&event) {
            tracing::warn!(target: "catchpoint::telemetry", kind, %event, "policy event");
        } else {
            tracing::debug!(target: "catchpoint::telemetry", kind, %event, "policy event");
        }
        ready(Ok(()))
    }
}

/// Keeps the most recent events in memory; handy for tests and diagnostics.
///
/// Clones share the same buffer.
#[derive(Clone, Debug)]
pub struct MemorySink {
    buffer: Arc<Mutex<VecDeque<PolicyEvent>>>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl MemorySink {
    /// Sink holding up to 10 000 events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Sink holding up to `capacity` events (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Arc::default(),
            capacity: capacity.max(1),
            dropped: Arc::default(),
        }
    }

    /// Sink that never drops events.
    pub fn unbounded() -> Self {
        Self::with_capacity(usize::MAX)
    }

    fn buffer(&self) -> MutexGuard<'_, VecDeque<PolicyEvent>> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stored events, oldest first.
    pub fn events(&self) -> Vec<PolicyEvent> {
        self.buffer().iter().cloned().collect()
    }

    /// Forget stored events.
    pub fn clear(&self) {
        self.buffer().clear();
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    /// Whether no events are stored.
    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    /// Maximum number of stored events.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest events discarded to stay within the capacity.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record(&self, event: PolicyEvent) {
        let mut buffer = self.buffer();
        if buffer.len() == self.capacity {
            buffer.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buffer.push_back(event);
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<PolicyEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        self.record(event);
        ready(Ok(()))
    }
}
