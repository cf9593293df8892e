//! Convenient re-exports for common catchpoint types.
pub use crate::{
    delegate::Delegate,
    error::{BoxError, ConfigError, FailedReason, PolicyError},
    fallback::FallbackPolicy,
    filter::CatchBlockFilter,
    handler::{FnHandler, HandlerVerdict, ResultHandler},
    jitter::Jitter,
    policy::{Policy, PolicyKind},
    processor::{BulkErrorProcessor, CancellationType, ErrorContext, ErrorProcessor, FnProcessor},
    result::PolicyResult,
    retry::{RetryCount, RetryPolicy},
    retry_delay::RetryDelay,
    simple::SimplePolicy,
    sleeper::{InstantSleeper, Sleeper, TokioSleeper},
    CancellationToken,
};
