//! Error types and failure taxonomy for policy execution.
//!
//! Primary delegate failures are kept as [`PolicyError`] values (shared, type-erased errors that
//! can still be downcast). Failures raised by the policy machinery itself (processors, savers,
//! fallback delegates, result handlers) are recorded as [`CatchBlockError`]s tagged with their
//! [`CatchBlockSource`].
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Boxed error accepted from delegates, processors and handlers.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Shared error recorded in a [`PolicyResult`](crate::PolicyResult).
pub type PolicyError = Arc<dyn Error + Send + Sync + 'static>;

pub(crate) fn into_policy_error<E: Into<BoxError>>(err: E) -> PolicyError {
    Arc::from(err.into())
}

/// Whether `err` is exactly an `E`.
pub(crate) fn error_is<E: Error + 'static>(err: &PolicyError) -> bool {
    err.as_ref().is::<E>()
}

/// Whether the direct cause of `err` is an `E`.
pub(crate) fn inner_error_is<E: Error + 'static>(err: &PolicyError) -> bool {
    err.as_ref().source().is_some_and(|inner| inner.is::<E>())
}

/// Why a result was marked failed, beyond the primary errors it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailedReason {
    /// No secondary reason; either not failed or failed by the strategy itself.
    #[default]
    None,
    /// A policy rule (the fallback delegate) failed after the error was handled.
    PolicyProcessorFailed,
    /// A post-result handler failed or flagged the result.
    PolicyResultHandlerFailed,
    /// No delegate was supplied.
    DelegateIsNull,
}

/// Which piece of policy machinery raised a [`CatchBlockError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchBlockSource {
    /// The strategy's own rule, e.g. the fallback delegate.
    PolicyRule,
    /// An entry of the bulk error processor.
    ErrorProcessor,
    /// The custom error saver.
    ErrorSaver,
    /// A post-result handler.
    PolicyResultHandlerFailed,
}

impl fmt::Display for CatchBlockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PolicyRule => "policy rule",
            Self::ErrorProcessor => "error processor",
            Self::ErrorSaver => "error saver",
            Self::PolicyResultHandlerFailed => "policy result handler",
        };
        f.write_str(name)
    }
}

/// Error raised by secondary policy machinery rather than by the primary delegate.
#[derive(Debug, Clone)]
pub struct CatchBlockError {
    error: PolicyError,
    source: CatchBlockSource,
    is_critical: bool,
}

impl CatchBlockError {
    pub(crate) fn new(error: PolicyError, source: CatchBlockSource, is_critical: bool) -> Self {
        Self { error, source, is_critical }
    }

    /// The underlying error.
    pub fn error(&self) -> &PolicyError {
        &self.error
    }

    /// Where the error was raised.
    pub fn source(&self) -> CatchBlockSource {
        self.source
    }

    /// Whether the error escalated to a result failure.
    pub fn is_critical(&self) -> bool {
        self.is_critical
    }
}

impl fmt::Display for CatchBlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = if self.is_critical { "critical" } else { "non-critical" };
        write!(f, "{} {} failure: {}", severity, self.source, self.error)
    }
}

/// Placed in `errors` when a policy is executed without a delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no delegate was supplied to the policy")]
pub struct NoDelegateError;

/// Execution models a bridged call crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeDirection {
    /// A synchronous call blocked on an asynchronous function.
    SyncOverAsync,
    /// An asynchronous call ran a synchronous function inline.
    AsyncOverSync,
}

impl fmt::Display for BridgeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SyncOverAsync => f.write_str("sync-over-async"),
            Self::AsyncOverSync => f.write_str("async-over-sync"),
        }
    }
}

/// Reported as `critical_error` when a failure surfaced through a sync/async bridge.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{direction} bridge failed: {source}")]
pub struct BridgeError {
    direction: BridgeDirection,
    #[source]
    source: PolicyError,
}

impl BridgeError {
    pub(crate) fn new(direction: BridgeDirection, source: PolicyError) -> Self {
        Self { direction, source }
    }

    /// Which way the call crossed.
    pub fn direction(&self) -> BridgeDirection {
        self.direction
    }

    /// The error raised on the other side of the bridge.
    pub fn inner(&self) -> &PolicyError {
        &self.source
    }
}

/// Surfaced to a parent policy when its wrapped child failed without recording an error
/// (e.g. a result handler flagged it).
#[derive(Debug, Clone, thiserror::Error)]
#[error("wrapped policy `{policy}` failed ({reason:?})")]
pub struct WrappedPolicyFailed {
    /// Name of the child policy.
    pub policy: String,
    /// The child's failure reason.
    pub reason: FailedReason,
}

/// A cancelable wait or step observed cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation canceled")]
pub struct Canceled;

/// Errors produced while configuring a policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The single wrap slot is already taken.
    #[error("policy `{policy}` already wraps another policy")]
    PolicyAlreadyWrapped {
        /// Name of the policy whose slot is taken.
        policy: String,
    },
    /// Invalid retry delay configuration.
    #[error(transparent)]
    Delay(#[from] crate::retry_delay::DelayError),
}
