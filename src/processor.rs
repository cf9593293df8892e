//! Error processors: side effects run for every error a policy handles.
//!
//! Every processor shape is normalized into one signature,
//! [`ErrorProcessor::process`]`(error, context, token)`. [`FnProcessor`] adapts plain closures
//! (infallible, context-aware, token-aware, fallible, async, typed-parameter) into it, and
//! [`BulkErrorProcessor`] runs an ordered list of them.
//!
//! Semantics:
//! - Entries run in registration order, once per handled error.
//! - A failing entry is recorded as a non-critical catch-block error and the pipeline continues.
//! - A canceled token stops the pipeline: [`CancellationType::Precancelable`] entries check it
//!   before running, and every entry is followed by a check.
//!
//! ```rust
//! use catchpoint::{BulkErrorProcessor, ErrorContext, PolicyError};
//! use tokio_util::sync::CancellationToken;
//!
//! let bulk = BulkErrorProcessor::new()
//!     .with_action(|e: &PolicyError| eprintln!("attempt failed: {e}"))
//!     .with_fallible_action(|_e: &PolicyError, _ctx: &ErrorContext<'_>, _t: &CancellationToken| {
//!         Err::<(), _>("audit log unavailable")
//!     });
//!
//! let err: PolicyError = std::sync::Arc::new(std::fmt::Error);
//! let report = futures::executor::block_on(bulk.process(
//!     &err,
//!     &ErrorContext::new(),
//!     &CancellationToken::new(),
//! ));
//! assert_eq!(report.invoked(), 2);
//! assert_eq!(report.catch_block_errors().len(), 1);
//! assert!(!report.is_canceled());
//! ```

use crate::error::{into_policy_error, BoxError, CatchBlockError, CatchBlockSource, PolicyError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-error information handed to processors.
#[derive(Clone, Copy, Default)]
pub struct ErrorContext<'a> {
    attempt: Option<usize>,
    param: Option<&'a (dyn Any + Send + Sync)>,
}

impl fmt::Debug for ErrorContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorContext")
            .field("attempt", &self.attempt)
            .field("has_param", &self.param.is_some())
            .finish()
    }
}

impl<'a> ErrorContext<'a> {
    /// Context with no attempt index and no parameter.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn for_call(
        attempt: Option<usize>,
        param: Option<&'a (dyn Any + Send + Sync)>,
    ) -> Self {
        Self { attempt, param }
    }

    /// Attach an attempt index.
    pub fn with_attempt(mut self, attempt: usize) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Attach a call parameter.
    pub fn with_param<P: Send + Sync + 'static>(mut self, param: &'a P) -> Self {
        self.param = Some(param);
        self
    }

    /// Zero-based attempt that failed; only retry policies report one.
    pub fn attempt(&self) -> Option<usize> {
        self.attempt
    }

    /// Parameter passed to `execute_with`, if it has type `P`.
    pub fn param<P: 'static>(&self) -> Option<&'a P> {
        self.param.and_then(|param| param.downcast_ref::<P>())
    }
}

/// Side effect run for a handled error.
#[async_trait]
pub trait ErrorProcessor: Send + Sync {
    /// Process `error`. A returned error is recorded, never propagated.
    async fn process(
        &self,
        error: &PolicyError,
        ctx: &ErrorContext<'_>,
        token: &CancellationToken,
    ) -> Result<(), BoxError>;
}

/// When the ambient cancellation token is consulted for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancellationType {
    /// The entry observes the token itself while running.
    Cancelable,
    /// The pipeline checks the token before running the entry.
    #[default]
    Precancelable,
}

type BlockingProcessFn = Arc<
    dyn Fn(&PolicyError, &ErrorContext<'_>, &CancellationToken) -> Result<(), BoxError>
        + Send
        + Sync,
>;
type AsyncProcessFn = Arc<
    dyn Fn(PolicyError, CancellationToken) -> BoxFuture<'static, Result<(), BoxError>>
        + Send
        + Sync,
>;

#[derive(Clone)]
enum ProcessFn {
    Blocking(BlockingProcessFn),
    Async(AsyncProcessFn),
}

fn blocking<F>(f: F) -> ProcessFn
where
    F: Fn(&PolicyError, &ErrorContext<'_>, &CancellationToken) -> Result<(), BoxError>
        + Send
        + Sync
        + 'static,
{
    ProcessFn::Blocking(Arc::new(f))
}

/// Closure-backed [`ErrorProcessor`].
#[derive(Clone)]
pub struct FnProcessor {
    f: ProcessFn,
}

impl fmt::Debug for FnProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self.f {
            ProcessFn::Blocking(_) => "blocking",
            ProcessFn::Async(_) => "async",
        };
        f.debug_struct("FnProcessor").field("shape", &shape).finish()
    }
}

impl FnProcessor {
    /// Infallible action on the error.
    pub fn action<F>(f: F) -> Self
    where
        F: Fn(&PolicyError) + Send + Sync + 'static,
    {
        Self {
            f: blocking(move |error, _ctx, _token| {
                f(error);
                Ok(())
            }),
        }
    }

    /// Infallible action that also sees the [`ErrorContext`].
    pub fn with_context<F>(f: F) -> Self
    where
        F: Fn(&PolicyError, &ErrorContext<'_>) + Send + Sync + 'static,
    {
        Self {
            f: blocking(move |error, ctx, _token| {
                f(error, ctx);
                Ok(())
            }),
        }
    }

    /// Infallible action that can observe or trigger cancellation.
    pub fn with_token<F>(f: F) -> Self
    where
        F: Fn(&PolicyError, &CancellationToken) + Send + Sync + 'static,
    {
        Self {
            f: blocking(move |error, _ctx, token| {
                f(error, token);
                Ok(())
            }),
        }
    }

    /// Full-shape action that may fail.
    pub fn fallible<F, E>(f: F) -> Self
    where
        F: Fn(&PolicyError, &ErrorContext<'_>, &CancellationToken) -> Result<(), E>
            + Send
            + Sync
            + 'static,
        E: Into<BoxError>,
    {
        Self { f: blocking(move |error, ctx, token| f(error, ctx, token).map_err(Into::into)) }
    }

    /// Asynchronous action; receives owned handles so the future can outlive the call.
    pub fn from_async<F, Fut, E>(f: F) -> Self
    where
        F: Fn(PolicyError, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let f: AsyncProcessFn = Arc::new(
            move |error: PolicyError,
                  token: CancellationToken|
                  -> BoxFuture<'static, Result<(), BoxError>> {
                let fut = f(error, token);
                Box::pin(async move { fut.await.map_err(Into::into) })
            },
        );
        Self { f: ProcessFn::Async(f) }
    }

    /// Action that runs only when the call carries a parameter of type `P`.
    pub fn with_param<P, F>(f: F) -> Self
    where
        P: Send + Sync + 'static,
        F: Fn(&PolicyError, &P) + Send + Sync + 'static,
    {
        Self {
            f: blocking(move |error, ctx, _token| {
                if let Some(param) = ctx.param::<P>() {
                    f(error, param);
                }
                Ok(())
            }),
        }
    }
}

#[async_trait]
impl ErrorProcessor for FnProcessor {
    async fn process(
        &self,
        error: &PolicyError,
        ctx: &ErrorContext<'_>,
        token: &CancellationToken,
    ) -> Result<(), BoxError> {
        match &self.f {
            ProcessFn::Blocking(f) => f(error, ctx, token),
            ProcessFn::Async(f) => f(error.clone(), token.clone()).await,
        }
    }
}

#[derive(Clone)]
struct ProcessorEntry {
    processor: Arc<dyn ErrorProcessor>,
    cancellation: CancellationType,
}

/// Outcome of running a [`BulkErrorProcessor`] for one error.
#[derive(Debug, Default)]
pub struct ProcessReport {
    catch_block_errors: Vec<CatchBlockError>,
    invoked: usize,
    canceled: bool,
}

impl ProcessReport {
    /// Failures of individual entries, in order.
    pub fn catch_block_errors(&self) -> &[CatchBlockError] {
        &self.catch_block_errors
    }

    /// Number of entries that ran.
    pub fn invoked(&self) -> usize {
        self.invoked
    }

    /// Whether cancellation stopped the pipeline.
    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    pub(crate) fn into_parts(self) -> (Vec<CatchBlockError>, bool) {
        (self.catch_block_errors, self.canceled)
    }
}

/// Ordered pipeline of error processors.
#[derive(Clone, Default)]
pub struct BulkErrorProcessor {
    entries: Vec<ProcessorEntry>,
}

impl fmt::Debug for BulkErrorProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkErrorProcessor").field("entries", &self.entries.len()).finish()
    }
}

impl BulkErrorProcessor {
    /// Empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append any processor with an explicit cancellation type.
    pub fn with_processor<P>(mut self, processor: P, cancellation: CancellationType) -> Self
    where
        P: ErrorProcessor + 'static,
    {
        self.entries.push(ProcessorEntry { processor: Arc::new(processor), cancellation });
        self
    }

    /// Append an infallible action.
    pub fn with_action<F>(self, f: F) -> Self
    where
        F: Fn(&PolicyError) + Send + Sync + 'static,
    {
        self.with_processor(FnProcessor::action(f), CancellationType::Precancelable)
    }

    /// Append a context-aware action.
    pub fn with_context_action<F>(self, f: F) -> Self
    where
        F: Fn(&PolicyError, &ErrorContext<'_>) + Send + Sync + 'static,
    {
        self.with_processor(FnProcessor::with_context(f), CancellationType::Precancelable)
    }

    /// Append a token-aware action.
    pub fn with_token_action<F>(self, f: F) -> Self
    where
        F: Fn(&PolicyError, &CancellationToken) + Send + Sync + 'static,
    {
        self.with_processor(FnProcessor::with_token(f), CancellationType::Cancelable)
    }

    /// Append a fallible full-shape action.
    pub fn with_fallible_action<F, E>(self, f: F) -> Self
    where
        F: Fn(&PolicyError, &ErrorContext<'_>, &CancellationToken) -> Result<(), E>
            + Send
            + Sync
            + 'static,
        E: Into<BoxError>,
    {
        self.with_processor(FnProcessor::fallible(f), CancellationType::Cancelable)
    }

    /// Append an asynchronous action.
    pub fn with_async_action<F, Fut, E>(self, f: F) -> Self
    where
        F: Fn(PolicyError, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.with_processor(FnProcessor::from_async(f), CancellationType::Cancelable)
    }

    /// Append an action that runs only for calls carrying a `P` parameter.
    pub fn with_param_action<P, F>(self, f: F) -> Self
    where
        P: Send + Sync + 'static,
        F: Fn(&PolicyError, &P) + Send + Sync + 'static,
    {
        self.with_processor(FnProcessor::with_param(f), CancellationType::Precancelable)
    }

    /// Append every entry of `other`.
    pub fn append(&mut self, other: &BulkErrorProcessor) {
        self.entries.extend(other.entries.iter().cloned());
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pipeline is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every entry for `error`.
    pub async fn process(
        &self,
        error: &PolicyError,
        ctx: &ErrorContext<'_>,
        token: &CancellationToken,
    ) -> ProcessReport {
        let mut report = ProcessReport::default();
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.cancellation == CancellationType::Precancelable && token.is_cancelled() {
                report.canceled = true;
                break;
            }
            report.invoked += 1;
            if let Err(failure) = entry.processor.process(error, ctx, token).await {
                tracing::debug!(index, error = %failure, "error processor failed");
                report.catch_block_errors.push(CatchBlockError::new(
                    into_policy_error(failure),
                    CatchBlockSource::ErrorProcessor,
                    false,
                ));
            }
            if token.is_cancelled() {
                report.canceled = true;
                break;
            }
        }
        report
    }
}
