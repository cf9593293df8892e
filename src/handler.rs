//! Post-result handlers.
//!
//! Handlers run once per top-level call, after the strategy (and any wrapped child) finished,
//! in registration order. A handler can flag the result as failed ([`HandlerVerdict::SetFailed`])
//! or fail itself; both mark the result with
//! [`FailedReason::PolicyResultHandlerFailed`](crate::FailedReason::PolicyResultHandlerFailed)
//! and leave `unprocessed_error` untouched.
//!
//! Handlers are registered per value type: a handler for `PolicyResult<T>` only runs for calls
//! producing `T` (`()` for the calls without a value). They are skipped for canceled results and
//! for calls made without a delegate.

use crate::error::{
    into_policy_error, BoxError, CatchBlockError, CatchBlockSource, FailedReason, PolicyError,
};
use crate::result::PolicyResult;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::any::{Any, TypeId};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a handler decided about the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerVerdict {
    /// Leave the result as is.
    #[default]
    Continue,
    /// Mark the result failed.
    SetFailed,
}

/// Handler run against the finished result of a call producing `T`.
#[async_trait]
pub trait ResultHandler<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Inspect `result`. A returned error fails the result and is recorded as a catch-block error.
    async fn handle(
        &self,
        result: &PolicyResult<T>,
        token: &CancellationToken,
    ) -> Result<HandlerVerdict, BoxError>;
}

/// Owned summary of a result, handed to asynchronous handlers.
#[derive(Debug, Clone)]
pub struct ResultSnapshot {
    /// Name of the policy that produced the result.
    pub policy_name: String,
    /// Delegate errors at the time the handler ran.
    pub errors: Vec<PolicyError>,
    /// Failure reason at the time the handler ran.
    pub failed_reason: FailedReason,
    /// Whether the result was failed when the handler ran.
    pub is_failed: bool,
}

impl ResultSnapshot {
    fn of<T>(result: &PolicyResult<T>) -> Self {
        Self {
            policy_name: result.policy_name().to_string(),
            errors: result.errors().to_vec(),
            failed_reason: result.failed_reason(),
            is_failed: result.is_failed(),
        }
    }
}

type BlockingHandlerFn<T> = Arc<
    dyn Fn(&PolicyResult<T>, &CancellationToken) -> Result<HandlerVerdict, BoxError>
        + Send
        + Sync,
>;
type AsyncHandlerFn<T> = Arc<
    dyn Fn(&PolicyResult<T>, CancellationToken) -> BoxFuture<'static, Result<(), BoxError>>
        + Send
        + Sync,
>;

enum HandlerFn<T> {
    Blocking(BlockingHandlerFn<T>),
    Async(AsyncHandlerFn<T>),
}

impl<T> Clone for HandlerFn<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Blocking(f) => Self::Blocking(f.clone()),
            Self::Async(f) => Self::Async(f.clone()),
        }
    }
}

fn blocking<T, F>(f: F) -> HandlerFn<T>
where
    F: Fn(&PolicyResult<T>, &CancellationToken) -> Result<HandlerVerdict, BoxError>
        + Send
        + Sync
        + 'static,
{
    HandlerFn::Blocking(Arc::new(f))
}

fn asynchronous<T, F>(f: F) -> HandlerFn<T>
where
    F: Fn(&PolicyResult<T>, CancellationToken) -> BoxFuture<'static, Result<(), BoxError>>
        + Send
        + Sync
        + 'static,
{
    HandlerFn::Async(Arc::new(f))
}

/// Closure-backed [`ResultHandler`].
pub struct FnHandler<T> {
    f: HandlerFn<T>,
}

impl<T> Clone for FnHandler<T> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<T> fmt::Debug for FnHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self.f {
            HandlerFn::Blocking(_) => "blocking",
            HandlerFn::Async(_) => "async",
        };
        f.debug_struct("FnHandler").field("shape", &shape).finish()
    }
}

impl<T: Send + Sync + 'static> FnHandler<T> {
    /// Infallible handler.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&PolicyResult<T>) + Send + Sync + 'static,
    {
        Self {
            f: blocking(move |result, _token| {
                f(result);
                Ok(HandlerVerdict::Continue)
            }),
        }
    }

    /// Fallible, token-aware handler.
    pub fn fallible<F, E>(f: F) -> Self
    where
        F: Fn(&PolicyResult<T>, &CancellationToken) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self {
            f: blocking(move |result, token| {
                f(result, token).map(|()| HandlerVerdict::Continue).map_err(Into::into)
            }),
        }
    }

    /// Asynchronous handler working on a [`ResultSnapshot`].
    pub fn from_async<F, Fut, E>(f: F) -> Self
    where
        F: Fn(ResultSnapshot, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self {
            f: asynchronous(move |result, token| {
                let fut = f(ResultSnapshot::of(result), token);
                Box::pin(async move { fut.await.map_err(Into::into) })
            }),
        }
    }

    /// Flag the result as failed when `predicate` holds.
    pub fn set_failed_if<P>(predicate: P) -> Self
    where
        P: Fn(&PolicyResult<T>) -> bool + Send + Sync + 'static,
    {
        Self::set_failed_if_then(predicate, |_| {})
    }

    /// Flag the result as failed when `predicate` holds, then run `on_trigger`.
    pub fn set_failed_if_then<P, A>(predicate: P, on_trigger: A) -> Self
    where
        P: Fn(&PolicyResult<T>) -> bool + Send + Sync + 'static,
        A: Fn(&PolicyResult<T>) + Send + Sync + 'static,
    {
        Self {
            f: blocking(move |result, _token| {
                if predicate(result) {
                    on_trigger(result);
                    Ok(HandlerVerdict::SetFailed)
                } else {
                    Ok(HandlerVerdict::Continue)
                }
            }),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> FnHandler<T> {
    /// Asynchronous handler that also receives a copy of the produced value.
    pub fn from_async_with_value<F, Fut, E>(f: F) -> Self
    where
        F: Fn(Option<T>, ResultSnapshot, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self {
            f: asynchronous(move |result, token| {
                let fut = f(result.result().cloned(), ResultSnapshot::of(result), token);
                Box::pin(async move { fut.await.map_err(Into::into) })
            }),
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> ResultHandler<T> for FnHandler<T> {
    async fn handle(
        &self,
        result: &PolicyResult<T>,
        token: &CancellationToken,
    ) -> Result<HandlerVerdict, BoxError> {
        match &self.f {
            HandlerFn::Blocking(f) => f(result, token),
            HandlerFn::Async(f) => {
                f(result, token.clone()).await?;
                Ok(HandlerVerdict::Continue)
            }
        }
    }
}

#[derive(Clone)]
struct ErasedHandler {
    value_type: TypeId,
    handler: Arc<dyn Any + Send + Sync>,
}

/// Handlers of every value type, in registration order.
#[derive(Clone, Default)]
pub(crate) struct HandlerRegistry {
    entries: Vec<ErasedHandler>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry").field("handlers", &self.len()).finish()
    }
}

impl HandlerRegistry {
    pub(crate) fn push<T: Send + Sync + 'static>(&mut self, handler: Arc<dyn ResultHandler<T>>) {
        let handler = Arc::new(handler);
        self.entries.push(ErasedHandler { value_type: TypeId::of::<T>(), handler });
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn for_type<T: Send + Sync + 'static>(
        &self,
    ) -> impl Iterator<Item = &Arc<dyn ResultHandler<T>>> + Send + '_ {
        self.entries
            .iter()
            .filter(|entry| entry.value_type == TypeId::of::<T>())
            .filter_map(|entry| entry.handler.downcast_ref::<Arc<dyn ResultHandler<T>>>())
    }

    /// Run the handlers registered for `T` against `result`.
    pub(crate) async fn run<T: Send + Sync + 'static>(
        &self,
        result: &mut PolicyResult<T>,
        token: &CancellationToken,
    ) {
        for (index, handler) in self.for_type::<T>().enumerate() {
            if index > 0 && token.is_cancelled() {
                tracing::debug!(index, "result handlers stopped by cancellation");
                result.set_canceled();
                break;
            }
            match handler.handle(result, token).await {
                Ok(HandlerVerdict::Continue) => {}
                Ok(HandlerVerdict::SetFailed) => {
                    tracing::debug!(
                        index,
                        policy = result.policy_name(),
                        "result flagged as failed"
                    );
                    result.set_handler_failed(index);
                }
                Err(err) => {
                    tracing::warn!(index, error = %err, "result handler failed");
                    result.add_catch_block_error(CatchBlockError::new(
                        into_policy_error(err),
                        CatchBlockSource::PolicyResultHandlerFailed,
                        true,
                    ));
                    result.set_handler_failed(index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::into_policy_error;
    use futures::executor::block_on;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn registry_with<T: Send + Sync + 'static>(handlers: Vec<FnHandler<T>>) -> HandlerRegistry {
        let mut registry = HandlerRegistry::default();
        for handler in handlers {
            registry.push::<T>(Arc::new(handler));
        }
        registry
    }

    #[test]
    fn set_failed_if_flags_the_result() {
        let flag_zero = FnHandler::<i32>::set_failed_if(|r| r.result() == Some(&0));
        let registry = registry_with(vec![flag_zero]);
        let mut result = PolicyResult::new("p");
        result.set_value(Some(0));
        block_on(registry.run(&mut result, &CancellationToken::new()));
        assert!(result.is_failed());
        assert_eq!(result.failed_reason(), FailedReason::PolicyResultHandlerFailed);
        assert_eq!(result.failed_handler_index(), Some(0));
        assert!(result.unprocessed_error().is_none());
    }

    #[test]
    fn on_trigger_runs_only_when_predicate_holds() {
        let triggered = Arc::new(AtomicUsize::new(0));
        let seen = triggered.clone();
        let registry = registry_with(vec![FnHandler::<()>::set_failed_if_then(
            |r| !r.no_error(),
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            },
        )]);

        let mut clean: PolicyResult<()> = PolicyResult::new("p");
        block_on(registry.run(&mut clean, &CancellationToken::new()));
        assert!(!clean.is_failed());

        let mut dirty: PolicyResult<()> = PolicyResult::new("p");
        dirty.add_error(into_policy_error("e"));
        block_on(registry.run(&mut dirty, &CancellationToken::new()));
        assert!(dirty.is_failed());
        assert_eq!(triggered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_handler_is_recorded_as_critical() {
        let registry = registry_with(vec![
            FnHandler::<()>::new(|_| {}),
            FnHandler::<()>::fallible(|_, _| Err::<(), _>("handler broke")),
        ]);
        let mut result: PolicyResult<()> = PolicyResult::new("p");
        block_on(registry.run(&mut result, &CancellationToken::new()));
        assert!(result.is_failed());
        assert_eq!(result.failed_handler_index(), Some(1));
        assert!(result.unprocessed_error().is_none());
        let recorded = &result.catch_block_errors()[0];
        assert_eq!(recorded.source(), CatchBlockSource::PolicyResultHandlerFailed);
        assert!(recorded.is_critical());
    }

    #[test]
    fn handlers_only_run_for_their_value_type() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (calls.clone(), calls.clone());
        let mut registry = HandlerRegistry::default();
        registry.push::<u8>(Arc::new(FnHandler::new(move |_| a.lock().unwrap().push("u8"))));
        let strings = FnHandler::new(move |_| b.lock().unwrap().push("string"));
        registry.push::<String>(Arc::new(strings));
        assert_eq!(registry.len(), 2);

        let mut result: PolicyResult<String> = PolicyResult::new("p");
        block_on(registry.run(&mut result, &CancellationToken::new()));
        assert_eq!(*calls.lock().unwrap(), vec!["string"]);
    }

    #[test]
    fn cancellation_between_handlers_stops_the_pipeline() {
        let later = Arc::new(AtomicUsize::new(0));
        let seen = later.clone();
        let registry = registry_with(vec![
            FnHandler::<()>::fallible(|_, token| {
                token.cancel();
                Ok::<_, BoxError>(())
            }),
            FnHandler::<()>::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        ]);
        let mut result: PolicyResult<()> = PolicyResult::new("p");
        block_on(registry.run(&mut result, &CancellationToken::new()));
        assert!(result.is_canceled());
        assert!(result.is_failed());
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn async_handlers_see_snapshot_and_value() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let registry = registry_with(vec![FnHandler::<u32>::from_async_with_value(
            move |value, snapshot, _token| {
                let sink = sink.clone();
                async move {
                    *sink.lock().unwrap() = Some((value, snapshot.errors.len()));
                    Ok::<_, BoxError>(())
                }
            },
        )]);
        let mut result = PolicyResult::new("p");
        result.add_error(into_policy_error("handled"));
        result.set_value(Some(9));
        registry.run(&mut result, &CancellationToken::new()).await;
        assert_eq!(*seen.lock().unwrap(), Some((Some(9), 1)));
        assert!(!result.is_failed());
    }

    #[tokio::test]
    async fn async_handler_error_fails_result() {
        let handler = FnHandler::<()>::from_async(|snapshot, _token| async move {
            if snapshot.is_failed {
                Ok(())
            } else {
                Err::<(), BoxError>("unexpected success".into())
            }
        });
        let registry = registry_with(vec![handler]);
        let mut result: PolicyResult<()> = PolicyResult::new("p");
        registry.run(&mut result, &CancellationToken::new()).await;
        assert!(result.is_failed());
        assert_eq!(result.failed_handler_index(), Some(0));
    }
}
