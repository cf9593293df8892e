//! Execution core shared by every policy and every call shape.
//!
//! One asynchronous state machine serves all four call shapes. Synchronous entry points drive it
//! to completion in [`ExecMode::Blocking`], where delays use the blocking wait and asynchronous
//! processors, fallbacks or handlers are awaited in place. Asynchronous entry points hand back
//! the future.
//!
//! The blocking drive always runs inside a tokio context so bridged steps can use timers and I/O:
//! - on a multi-thread runtime the worker is handed off with `block_in_place` and the runtime's
//!   handle drives the core;
//! - on a current-thread runtime the core runs on a scoped thread with its own runtime, since
//!   blocking the only worker would deadlock;
//! - outside any runtime a current-thread runtime is built for the call.

use crate::delegate::Delegate;
use crate::error::{
    into_policy_error, CatchBlockError, CatchBlockSource, NoDelegateError, PolicyError,
    WrappedPolicyFailed,
};
use crate::fallback::FallbackPolicy;
use crate::policy::{Policy, PolicyCore, PolicyKind};
use crate::processor::ErrorContext;
use crate::result::PolicyResult;
use crate::retry::RetryPolicy;
use crate::simple::SimplePolicy;
use crate::telemetry::{ErrorEvent, PolicyEvent, RequestOutcome};
use futures::future::BoxFuture;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;

/// How the current call is being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecMode {
    /// A synchronous entry point blocks on the core.
    Blocking,
    /// An asynchronous entry point awaits the core.
    Async,
}

/// Borrowed state of one call, threaded through the strategy and any wrapped children.
pub struct Invocation<'a, 'd, T> {
    pub(crate) delegate: Option<&'a mut Delegate<'d, T>>,
    pub(crate) token: &'a CancellationToken,
    pub(crate) param: Option<&'a (dyn Any + Send + Sync)>,
    pub(crate) mode: ExecMode,
}

impl<'a, T> Invocation<'a, '_, T> {
    pub(crate) fn scope(&self) -> CallScope<'a> {
        CallScope { token: self.token, param: self.param, mode: self.mode }
    }
}

/// The shareable part of an [`Invocation`]: everything but the delegate.
#[derive(Clone, Copy)]
pub(crate) struct CallScope<'a> {
    pub(crate) token: &'a CancellationToken,
    pub(crate) param: Option<&'a (dyn Any + Send + Sync)>,
    pub(crate) mode: ExecMode,
}

/// Borrowed view of a concrete policy.
#[derive(Clone, Copy)]
pub enum Strategy<'a> {
    Retry(&'a RetryPolicy),
    Fallback(&'a FallbackPolicy),
    Simple(&'a SimplePolicy),
}

impl<'a> Strategy<'a> {
    pub(crate) fn core(self) -> &'a PolicyCore {
        match self {
            Strategy::Retry(policy) => policy.core(),
            Strategy::Fallback(policy) => policy.core(),
            Strategy::Simple(policy) => policy.core(),
        }
    }

    pub(crate) fn kind(self) -> PolicyKind {
        match self {
            Strategy::Retry(_) => PolicyKind::Retry,
            Strategy::Fallback(_) => PolicyKind::Fallback,
            Strategy::Simple(_) => PolicyKind::Simple,
        }
    }
}

/// Restricts [`Policy`] to the policies of this crate.
pub trait Sealed {
    #[doc(hidden)]
    fn strategy(&self) -> Strategy<'_>;
}

/// Why an attempt did not produce a value.
pub(crate) enum AttemptFailure {
    Canceled,
    Failed {
        error: PolicyError,
        /// Already present in the result's `errors` (merged from a wrapped child).
        recorded: bool,
    },
}

/// What became of a failed attempt's error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Handled,
    Rejected,
    Canceled,
    SaverFailed,
}

/// Run a complete call: strategy, wrapped children, then result handlers.
pub(crate) fn execute<'a, 'd, T>(
    strategy: Strategy<'a>,
    mut inv: Invocation<'a, 'd, T>,
) -> BoxFuture<'a, PolicyResult<T>>
where
    T: Send + Sync + 'static,
{
    Box::pin(async move {
        let core = strategy.core();
        let started = Instant::now();

        if inv.delegate.is_none() {
            tracing::warn!(policy = %core.name, "policy executed without a delegate");
            let result = PolicyResult::delegate_missing(core.name.clone());
            core.emit(request_outcome(&result, started.elapsed())).await;
            return result;
        }

        let mut result = match strategy {
            Strategy::Retry(policy) => policy.run(&mut inv).await,
            Strategy::Fallback(policy) => policy.run(&mut inv).await,
            Strategy::Simple(policy) => policy.run(&mut inv).await,
        };

        if !result.is_canceled() {
            core.handlers.run(&mut result, inv.token).await;
        }
        core.emit(request_outcome(&result, started.elapsed())).await;
        result
    })
}

/// Synchronous entry: block the calling thread on the core.
///
/// # Panics
///
/// Panics if `delegate` is asynchronous.
pub(crate) fn run_blocking<T>(
    strategy: Strategy<'_>,
    delegate: Option<Delegate<'_, T>>,
    token: &CancellationToken,
    param: Option<&(dyn Any + Send + Sync)>,
) -> PolicyResult<T>
where
    T: Send + Sync + 'static,
{
    let mut delegate = delegate;
    if delegate.as_ref().is_some_and(Delegate::is_async) {
        panic!(
            "invalid argument: asynchronous delegate passed to a synchronous entry point of `{}`; \
             use the `*_async` methods",
            strategy.core().name
        );
    }
    let inv = Invocation { delegate: delegate.as_mut(), token, param, mode: ExecMode::Blocking };
    block_on_tokio(execute(strategy, inv))
}

fn block_on_tokio<F>(future: F) -> F::Output
where
    F: Future + Send,
    F::Output: Send,
{
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| handle.block_on(future))
        }
        Ok(_) => std::thread::scope(|scope| {
            let dispatch = tracing::dispatcher::get_default(Clone::clone);
            let worker = scope.spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || block_on_fresh_runtime(future))
            });
            match worker.join() {
                Ok(output) => output,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }),
        Err(_) => block_on_fresh_runtime(future),
    }
}

fn block_on_fresh_runtime<F: Future>(future: F) -> F::Output {
    match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime.block_on(future),
        Err(error) => {
            tracing::warn!(%error, "failed to start a tokio runtime, blocking without one");
            futures::executor::block_on(future)
        }
    }
}

/// Asynchronous entry: await the core.
pub(crate) async fn run_async<T>(
    strategy: Strategy<'_>,
    delegate: Option<Delegate<'_, T>>,
    token: &CancellationToken,
    param: Option<&(dyn Any + Send + Sync)>,
) -> PolicyResult<T>
where
    T: Send + Sync + 'static,
{
    let mut delegate = delegate;
    let inv = Invocation { delegate: delegate.as_mut(), token, param, mode: ExecMode::Async };
    execute(strategy, inv).await
}

/// One attempt: the wrapped child's full execution if there is one, otherwise the delegate.
pub(crate) async fn attempt<T>(
    core: &PolicyCore,
    inv: &mut Invocation<'_, '_, T>,
    result: &mut PolicyResult<T>,
) -> Result<Option<T>, AttemptFailure>
where
    T: Send + Sync + 'static,
{
    if inv.token.is_cancelled() {
        return Err(AttemptFailure::Canceled);
    }

    if let Some(child) = &core.wrapped {
        let child_inv = Invocation {
            delegate: inv.delegate.as_deref_mut(),
            token: inv.token,
            // parameters stay with the outermost call
            param: None,
            mode: inv.mode,
        };
        let child_result = execute(child.strategy(), child_inv).await;
        return absorb_child(child.kind(), child_result, result);
    }

    let Some(delegate) = inv.delegate.as_deref_mut() else {
        return Err(AttemptFailure::Failed { error: Arc::new(NoDelegateError), recorded: false });
    };
    match delegate.invoke(inv.token).await {
        Ok(value) => Ok(Some(value)),
        Err(error) if inv.token.is_cancelled() => {
            result.add_error(error);
            Err(AttemptFailure::Canceled)
        }
        Err(error) => Err(AttemptFailure::Failed { error, recorded: false }),
    }
}

/// Fold a wrapped child's outcome into the parent's result.
fn absorb_child<T>(
    kind: PolicyKind,
    child: PolicyResult<T>,
    result: &mut PolicyResult<T>,
) -> Result<Option<T>, AttemptFailure> {
    let canceled = child.is_canceled();
    let failed = child.is_failed();
    let escaping = child.last_error().cloned();
    let failure = WrappedPolicyFailed {
        policy: child.policy_name().to_string(),
        reason: child.failed_reason(),
    };
    for error in child.errors() {
        result.add_error(error.clone());
    }
    let (value, wrapped) = child.into_wrapped(kind);
    result.add_wrapped_result(wrapped);

    if canceled {
        return Err(AttemptFailure::Canceled);
    }
    if !failed {
        return Ok(value);
    }
    Err(match escaping {
        Some(error) => AttemptFailure::Failed { error, recorded: true },
        None => AttemptFailure::Failed { error: Arc::new(failure), recorded: false },
    })
}

/// Filter, record and process a failed attempt's error.
pub(crate) async fn handle_error<T>(
    core: &PolicyCore,
    error: &PolicyError,
    recorded: bool,
    attempt: Option<usize>,
    scope: CallScope<'_>,
    result: &mut PolicyResult<T>,
) -> Disposition
where
    T: Send + Sync + 'static,
{
    if !core.filter.admits(error) {
        tracing::debug!(policy = %core.name, error = %error, "error rejected by filter");
        if !recorded {
            result.add_error(error.clone());
        }
        result.set_unprocessed_error(error.clone());
        result.set_filter_unsatisfied();
        core.emit(PolicyEvent::Error(ErrorEvent::FilterRejected)).await;
        return Disposition::Rejected;
    }

    if !recorded && core.saver.is_none() {
        result.add_error(error.clone());
    }

    let ctx = ErrorContext::for_call(attempt, scope.param);
    let (failures, canceled) = core.processor.process(error, &ctx, scope.token).await.into_parts();
    for failure in failures {
        core.emit(PolicyEvent::Error(ErrorEvent::CatchBlock {
            source: CatchBlockSource::ErrorProcessor,
            critical: false,
        }))
        .await;
        result.add_catch_block_error(failure);
    }
    if canceled {
        tracing::debug!(policy = %core.name, "cancellation observed while processing error");
        return Disposition::Canceled;
    }

    if let Some(saver) = &core.saver {
        result.set_errors_not_used();
        if let Err(failure) = saver.process(error, &ctx, scope.token).await {
            tracing::warn!(policy = %core.name, error = %failure, "error saver failed");
            result.add_catch_block_error(CatchBlockError::new(
                into_policy_error(failure),
                CatchBlockSource::ErrorSaver,
                true,
            ));
            result.set_unprocessed_error(error.clone());
            result.set_failed();
            core.emit(PolicyEvent::Error(ErrorEvent::CatchBlock {
                source: CatchBlockSource::ErrorSaver,
                critical: true,
            }))
            .await;
            return Disposition::SaverFailed;
        }
    }

    core.emit(PolicyEvent::Error(ErrorEvent::Handled { attempt })).await;
    Disposition::Handled
}

fn request_outcome<T>(result: &PolicyResult<T>, duration: Duration) -> PolicyEvent {
    let outcome = if result.is_canceled() {
        RequestOutcome::Canceled { duration }
    } else if result.is_failed() {
        RequestOutcome::Failure { duration, reason: result.failed_reason() }
    } else {
        RequestOutcome::Success { duration }
    };
    PolicyEvent::Request(outcome)
}
