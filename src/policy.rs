//! The shared policy surface.
//!
//! Every strategy ([`RetryPolicy`], [`FallbackPolicy`], [`SimplePolicy`]) carries the same
//! configuration: a name, an error filter, an error processor pipeline, an optional error saver,
//! a single wrap slot, result handlers and an optional telemetry sink. The [`Policy`] trait
//! exposes that configuration as consuming `with_*` builders together with the execute methods
//! for all four call shapes.
//!
//! Configured policies are immutable during execution and can be shared across threads.

use crate::delegate::Delegate;
use crate::engine::{self, Sealed, Strategy};
use crate::error::{BoxError, ConfigError, PolicyError};
use crate::error_set::ErrorSet;
use crate::fallback::FallbackPolicy;
use crate::filter::{CatchBlockFilter, ErrorFilter};
use crate::handler::{FnHandler, HandlerRegistry, ResultHandler};
use crate::processor::{BulkErrorProcessor, CancellationType, ErrorContext, ErrorProcessor};
use crate::result::PolicyResult;
use crate::retry::RetryPolicy;
use crate::simple::SimplePolicy;
use crate::telemetry::{boxed_sink, emit_best_effort, PolicyEvent, PolicySink};
use futures::future::BoxFuture;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::Service;

/// The strategy a policy applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// Re-invoke the delegate up to a retry budget.
    Retry,
    /// Invoke the delegate once, then a fallback function on failure.
    Fallback,
    /// Invoke the delegate once.
    Simple,
}

impl PolicyKind {
    /// Name given to policies of this kind unless overridden.
    pub fn default_name(self) -> &'static str {
        match self {
            PolicyKind::Retry => "RetryPolicy",
            PolicyKind::Fallback => "FallbackPolicy",
            PolicyKind::Simple => "SimplePolicy",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PolicyKind::Retry => "retry",
            PolicyKind::Fallback => "fallback",
            PolicyKind::Simple => "simple",
        };
        f.write_str(name)
    }
}

/// A policy sitting in another policy's wrap slot.
#[derive(Debug, Clone)]
pub enum WrappedPolicy {
    /// Wrapped retry policy.
    Retry(Box<RetryPolicy>),
    /// Wrapped fallback policy.
    Fallback(Box<FallbackPolicy>),
    /// Wrapped single-attempt policy.
    Simple(Box<SimplePolicy>),
}

impl WrappedPolicy {
    /// Kind of the wrapped policy.
    pub fn kind(&self) -> PolicyKind {
        self.strategy().kind()
    }

    /// Name of the wrapped policy.
    pub fn name(&self) -> &str {
        &self.strategy().core().name
    }

    pub(crate) fn strategy(&self) -> Strategy<'_> {
        match self {
            WrappedPolicy::Retry(policy) => Strategy::Retry(policy),
            WrappedPolicy::Fallback(policy) => Strategy::Fallback(policy),
            WrappedPolicy::Simple(policy) => Strategy::Simple(policy),
        }
    }
}

impl From<RetryPolicy> for WrappedPolicy {
    fn from(policy: RetryPolicy) -> Self {
        WrappedPolicy::Retry(Box::new(policy))
    }
}

impl From<FallbackPolicy> for WrappedPolicy {
    fn from(policy: FallbackPolicy) -> Self {
        WrappedPolicy::Fallback(Box::new(policy))
    }
}

impl From<SimplePolicy> for WrappedPolicy {
    fn from(policy: SimplePolicy) -> Self {
        WrappedPolicy::Simple(Box::new(policy))
    }
}

/// Configuration shared by every strategy.
#[doc(hidden)]
#[derive(Clone)]
pub struct PolicyCore {
    pub(crate) name: String,
    pub(crate) filter: ErrorFilter,
    pub(crate) processor: BulkErrorProcessor,
    pub(crate) saver: Option<Arc<dyn ErrorProcessor>>,
    pub(crate) wrapped: Option<WrappedPolicy>,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) telemetry: Option<PolicySink>,
}

impl fmt::Debug for PolicyCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyCore")
            .field("name", &self.name)
            .field("filter", &self.filter)
            .field("processor", &self.processor)
            .field("saver", &self.saver.as_ref().map(|_| "<saver>"))
            .field("wrapped", &self.wrapped.as_ref().map(WrappedPolicy::name))
            .field("handlers", &self.handlers.len())
            .field("telemetry", &self.telemetry.as_ref().map(|_| "<sink>"))
            .finish()
    }
}

impl PolicyCore {
    pub(crate) fn new(kind: PolicyKind) -> Self {
        Self {
            name: kind.default_name().to_string(),
            filter: ErrorFilter::new(),
            processor: BulkErrorProcessor::new(),
            saver: None,
            wrapped: None,
            handlers: HandlerRegistry::default(),
            telemetry: None,
        }
    }

    pub(crate) async fn emit(&self, event: PolicyEvent) {
        if let Some(sink) = &self.telemetry {
            emit_best_effort(sink.clone(), event).await;
        }
    }
}

fn map_filter<P: Policy>(mut policy: P, f: impl FnOnce(ErrorFilter) -> ErrorFilter) -> P {
    let filter = std::mem::take(&mut policy.core_mut().filter);
    policy.core_mut().filter = f(filter);
    policy
}

fn push_handler<P: Policy, T: Send + Sync + 'static>(
    mut policy: P,
    handler: Arc<dyn ResultHandler<T>>,
) -> P {
    policy.core_mut().handlers.push::<T>(handler);
    policy
}

/// Behavior shared by every policy: configuration builders and the execute methods.
///
/// Execution never returns `Err`; every outcome is described by the returned [`PolicyResult`].
///
/// # Call shapes
///
/// | shape | methods |
/// |---|---|
/// | sync, no value | [`execute`](Policy::execute) |
/// | sync, value | [`execute_value`](Policy::execute_value), [`execute_cancelable`](Policy::execute_cancelable), [`execute_with`](Policy::execute_with) |
/// | async, no value | [`execute_async`](Policy::execute_async) |
/// | async, value | [`execute_value_async`](Policy::execute_value_async), [`execute_with_async`](Policy::execute_with_async) |
/// | general | [`execute_delegate`](Policy::execute_delegate), [`execute_delegate_async`](Policy::execute_delegate_async) |
///
/// ```rust
/// use catchpoint::{Policy, SimplePolicy};
///
/// let policy = SimplePolicy::new().include_error::<std::num::ParseIntError>();
/// let result = policy.execute_value(|| "42".parse::<i32>());
/// assert_eq!(result.result(), Some(&42));
///
/// let result = policy.execute_value(|| "x".parse::<i32>());
/// assert!(result.is_success());
/// assert_eq!(result.errors().len(), 1);
/// ```
pub trait Policy: Sealed + Clone + fmt::Debug + Send + Sync + Sized + 'static {
    #[doc(hidden)]
    fn core(&self) -> &PolicyCore;

    #[doc(hidden)]
    fn core_mut(&mut self) -> &mut PolicyCore;

    /// The policy's name.
    fn name(&self) -> &str {
        &self.core().name
    }

    /// The policy's strategy.
    fn kind(&self) -> PolicyKind {
        self.strategy().kind()
    }

    /// Rename the policy.
    fn with_policy_name(mut self, name: impl Into<String>) -> Self {
        self.core_mut().name = name.into();
        self
    }

    /// The compiled error filter.
    fn error_filter(&self) -> &ErrorFilter {
        &self.core().filter
    }

    /// Handle errors of type `E`.
    fn include_error<E: Error + 'static>(self) -> Self {
        map_filter(self, ErrorFilter::include_error::<E>)
    }

    /// Never handle errors of type `E`.
    fn exclude_error<E: Error + 'static>(self) -> Self {
        map_filter(self, ErrorFilter::exclude_error::<E>)
    }

    /// Handle errors whose direct cause is of type `E`.
    fn include_inner_error<E: Error + 'static>(self) -> Self {
        map_filter(self, ErrorFilter::include_inner_error::<E>)
    }

    /// Never handle errors whose direct cause is of type `E`.
    fn exclude_inner_error<E: Error + 'static>(self) -> Self {
        map_filter(self, ErrorFilter::exclude_inner_error::<E>)
    }

    /// Handle errors of type `E` satisfying `predicate`.
    fn include_error_where<E, F>(self, predicate: F) -> Self
    where
        E: Error + 'static,
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        map_filter(self, |filter| filter.include_error_where(predicate))
    }

    /// Never handle errors of type `E` satisfying `predicate`.
    fn exclude_error_where<E, F>(self, predicate: F) -> Self
    where
        E: Error + 'static,
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        map_filter(self, |filter| filter.exclude_error_where(predicate))
    }

    /// Handle errors matching any entry of `set`.
    fn include_error_set(self, set: &ErrorSet) -> Self {
        map_filter(self, |filter| filter.include_error_set(set))
    }

    /// Never handle errors matching any entry of `set`.
    fn exclude_error_set(self, set: &ErrorSet) -> Self {
        map_filter(self, |filter| filter.exclude_error_set(set))
    }

    /// Handle errors satisfying an arbitrary predicate.
    fn include_error_if<F>(self, predicate: F) -> Self
    where
        F: Fn(&PolicyError) -> bool + Send + Sync + 'static,
    {
        map_filter(self, |filter| filter.include(predicate))
    }

    /// Never handle errors satisfying an arbitrary predicate.
    fn exclude_error_if<F>(self, predicate: F) -> Self
    where
        F: Fn(&PolicyError) -> bool + Send + Sync + 'static,
    {
        map_filter(self, |filter| filter.exclude(predicate))
    }

    /// Append the predicates of a prepared filter.
    fn with_error_filter(mut self, filter: &CatchBlockFilter) -> Self {
        self.core_mut().filter.append(filter.error_filter());
        self
    }

    /// Run `f` for every handled error.
    fn with_error_processor<F>(self, f: F) -> Self
    where
        F: Fn(&PolicyError) + Send + Sync + 'static,
    {
        self.with_bulk_processor(&BulkErrorProcessor::new().with_action(f))
    }

    /// Run `f` with the [`ErrorContext`] for every handled error.
    fn with_context_error_processor<F>(self, f: F) -> Self
    where
        F: Fn(&PolicyError, &ErrorContext<'_>) + Send + Sync + 'static,
    {
        self.with_bulk_processor(&BulkErrorProcessor::new().with_context_action(f))
    }

    /// Run `f` with the call's token for every handled error.
    fn with_token_error_processor<F>(self, f: F) -> Self
    where
        F: Fn(&PolicyError, &CancellationToken) + Send + Sync + 'static,
    {
        self.with_bulk_processor(&BulkErrorProcessor::new().with_token_action(f))
    }

    /// Run an asynchronous action for every handled error.
    fn with_async_error_processor<F, Fut, E>(self, f: F) -> Self
    where
        F: Fn(PolicyError, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.with_bulk_processor(&BulkErrorProcessor::new().with_async_action(f))
    }

    /// Run `f` for every handled error of calls carrying a `P` parameter.
    fn with_param_error_processor<P, F>(self, f: F) -> Self
    where
        P: Send + Sync + 'static,
        F: Fn(&PolicyError, &P) + Send + Sync + 'static,
    {
        self.with_bulk_processor(&BulkErrorProcessor::new().with_param_action(f))
    }

    /// Append any [`ErrorProcessor`].
    fn with_processor<P>(self, processor: P, cancellation: CancellationType) -> Self
    where
        P: ErrorProcessor + 'static,
    {
        self.with_bulk_processor(&BulkErrorProcessor::new().with_processor(processor, cancellation))
    }

    /// Append every entry of a prepared pipeline.
    fn with_bulk_processor(mut self, processor: &BulkErrorProcessor) -> Self {
        self.core_mut().processor.append(processor);
        self
    }

    /// Persist handled errors through `saver` instead of the result's `errors`.
    fn with_error_saver<P>(mut self, saver: P) -> Self
    where
        P: ErrorProcessor + 'static,
    {
        self.core_mut().saver = Some(Arc::new(saver));
        self
    }

    /// Register a handler for results of calls producing `T`.
    fn with_result_handler<T, H>(self, handler: H) -> Self
    where
        T: Send + Sync + 'static,
        H: ResultHandler<T> + 'static,
    {
        push_handler::<Self, T>(self, Arc::new(handler))
    }

    /// Register an infallible handler for results of calls producing `T`.
    fn with_handler_fn<T, F>(self, f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&PolicyResult<T>) + Send + Sync + 'static,
    {
        self.with_result_handler::<T, _>(FnHandler::new(f))
    }

    /// Mark results of calls producing `T` failed when `predicate` holds.
    fn set_failed_if<T, F>(self, predicate: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&PolicyResult<T>) -> bool + Send + Sync + 'static,
    {
        self.with_result_handler::<T, _>(FnHandler::set_failed_if(predicate))
    }

    /// Like [`set_failed_if`](Policy::set_failed_if), also running `on_trigger` when it fires.
    fn set_failed_if_then<T, F, A>(self, predicate: F, on_trigger: A) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&PolicyResult<T>) -> bool + Send + Sync + 'static,
        A: Fn(&PolicyResult<T>) + Send + Sync + 'static,
    {
        self.with_result_handler::<T, _>(FnHandler::set_failed_if_then(predicate, on_trigger))
    }

    /// Emit [`PolicyEvent`]s to `sink`.
    fn with_telemetry<S>(mut self, sink: S) -> Self
    where
        S: Service<PolicyEvent, Response = ()> + Clone + Send + Sync + 'static,
        S::Error: Into<BoxError>,
        S::Future: Send + 'static,
    {
        self.core_mut().telemetry = Some(boxed_sink(sink));
        self
    }

    /// Place `child` in this policy's wrap slot.
    ///
    /// Every attempt then runs the child's full execution (including its handlers) instead of the
    /// delegate. Fails if the slot is already taken.
    fn wrap_policy(mut self, child: impl Into<WrappedPolicy>) -> Result<Self, ConfigError> {
        if self.core().wrapped.is_some() {
            return Err(ConfigError::PolicyAlreadyWrapped { policy: self.name().to_string() });
        }
        self.core_mut().wrapped = Some(child.into());
        Ok(self)
    }

    /// The policy in the wrap slot.
    fn wrapped_policy(&self) -> Option<&WrappedPolicy> {
        self.core().wrapped.as_ref()
    }

    /// Run a blocking operation producing no value.
    fn execute<F, E>(&self, f: F) -> PolicyResult<()>
    where
        F: FnMut() -> Result<(), E> + Send,
        E: Into<BoxError>,
    {
        self.execute_value(f)
    }

    /// Run a blocking operation producing a value.
    fn execute_value<T, F, E>(&self, f: F) -> PolicyResult<T>
    where
        T: Send + Sync + 'static,
        F: FnMut() -> Result<T, E> + Send,
        E: Into<BoxError>,
    {
        let token = CancellationToken::new();
        engine::run_blocking(self.strategy(), Some(Delegate::blocking(f)), &token, None)
    }

    /// Run a blocking, token-aware operation under `token`.
    fn execute_cancelable<T, F, E>(&self, f: F, token: &CancellationToken) -> PolicyResult<T>
    where
        T: Send + Sync + 'static,
        F: FnMut(&CancellationToken) -> Result<T, E> + Send,
        E: Into<BoxError>,
    {
        engine::run_blocking(self.strategy(), Some(Delegate::blocking_with_token(f)), token, None)
    }

    /// Run a blocking operation on `param`; processors see the parameter through
    /// [`ErrorContext::param`].
    fn execute_with<P, T, F, E>(&self, param: P, mut f: F) -> PolicyResult<T>
    where
        P: Send + Sync + 'static,
        T: Send + Sync + 'static,
        F: FnMut(&P) -> Result<T, E> + Send,
        E: Into<BoxError>,
    {
        let token = CancellationToken::new();
        let delegate = Delegate::blocking(|| f(&param));
        engine::run_blocking(self.strategy(), Some(delegate), &token, Some(&param))
    }

    /// General synchronous form. `None` yields a failed result with
    /// [`FailedReason::DelegateIsNull`](crate::FailedReason::DelegateIsNull).
    ///
    /// # Panics
    ///
    /// Panics if `delegate` is asynchronous; use
    /// [`execute_delegate_async`](Policy::execute_delegate_async) for those.
    fn execute_delegate<T>(
        &self,
        delegate: Option<Delegate<'_, T>>,
        token: &CancellationToken,
    ) -> PolicyResult<T>
    where
        T: Send + Sync + 'static,
    {
        engine::run_blocking(self.strategy(), delegate, token, None)
    }

    /// Run an asynchronous operation producing no value.
    fn execute_async<'a, F, Fut, E>(
        &'a self,
        f: F,
        token: CancellationToken,
    ) -> BoxFuture<'a, PolicyResult<()>>
    where
        F: FnMut() -> Fut + Send + 'a,
        Fut: Future<Output = Result<(), E>> + Send + 'a,
        E: Into<BoxError> + 'a,
    {
        self.execute_value_async(f, token)
    }

    /// Run an asynchronous operation producing a value.
    fn execute_value_async<'a, T, F, Fut, E>(
        &'a self,
        f: F,
        token: CancellationToken,
    ) -> BoxFuture<'a, PolicyResult<T>>
    where
        T: Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, E>> + Send + 'a,
        E: Into<BoxError> + 'a,
    {
        self.execute_delegate_async(Some(Delegate::from_async(f)), token)
    }

    /// Run an asynchronous operation on `param`.
    fn execute_with_async<'a, P, T, F, Fut, E>(
        &'a self,
        param: P,
        mut f: F,
        token: CancellationToken,
    ) -> BoxFuture<'a, PolicyResult<T>>
    where
        P: Send + Sync + 'static,
        T: Send + Sync + 'static,
        F: FnMut(&P) -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, E>> + Send + 'a,
        E: Into<BoxError> + 'a,
    {
        Box::pin(async move {
            let delegate = Delegate::from_async(|| f(&param));
            engine::run_async(self.strategy(), Some(delegate), &token, Some(&param)).await
        })
    }

    /// General asynchronous form; accepts blocking and asynchronous delegates.
    fn execute_delegate_async<'a, T>(
        &'a self,
        delegate: Option<Delegate<'a, T>>,
        token: CancellationToken,
    ) -> BoxFuture<'a, PolicyResult<T>>
    where
        T: Send + Sync + 'static,
    {
        Box::pin(async move { engine::run_async(self.strategy(), delegate, &token, None).await })
    }
}
