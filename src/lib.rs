#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # catchpoint
//!
//! Error-handling policies for Rust: retry, fallback and single-attempt strategies with
//! fine-grained error filtering, error processor pipelines, policy wrapping and post-result
//! handlers.
//!
//! ## Features
//!
//! - **Retry policies** with finite or infinite budgets and constant, linear, exponential or
//!   custom delays with jitter
//! - **Fallback policies** with per-type blocking and asynchronous fallback functions
//! - **Error filters** by type, inner cause, typed predicate or prepared error sets
//! - **Error processors** run for every handled error, with error savers for custom storage
//! - **Policy wrapping**: a policy can run another policy as its attempt
//! - **Result handlers** that can veto a result after the fact
//! - **Four call shapes**: blocking and async, with or without a value, all cancelable through
//!   a [`CancellationToken`]
//! - **Telemetry** through `tower::Service` sinks and `tracing` logs
//!
//! Execution never panics on delegate errors and never returns `Err`: every outcome is described
//! by the returned [`PolicyResult`].
//!
//! ## Quick Start
//!
//! ```rust
//! use catchpoint::{FallbackPolicy, InstantSleeper, Policy, RetryDelay, RetryPolicy};
//! use std::time::Duration;
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("service unavailable")]
//! struct Unavailable;
//!
//! let policy = RetryPolicy::new(2)
//!     .include_error::<Unavailable>()
//!     .with_delay(RetryDelay::constant(Duration::from_millis(50)))
//!     .with_sleeper(InstantSleeper)
//!     .then_fallback(FallbackPolicy::new().with_fallback_fn(|| "cached".to_string()))
//!     .unwrap();
//!
//! let result = policy.execute_value(|| Err::<String, _>(Unavailable));
//!
//! assert_eq!(result.result().map(String::as_str), Some("cached"));
//! assert_eq!(result.errors().len(), 3);
//! assert_eq!(result.wrapped_policy_results().len(), 1);
//! ```
//!
//! ## Async
//!
//! ```rust
//! use catchpoint::{CancellationToken, Policy, RetryPolicy};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::new(3);
//! let result = policy
//!     .execute_value_async(|| async { Ok::<_, std::io::Error>(200) }, CancellationToken::new())
//!     .await;
//! assert_eq!(result.result(), Some(&200));
//! # });
//! ```

mod engine;

pub mod delegate;
pub mod error;
pub mod error_set;
pub mod fallback;
pub mod filter;
pub mod handler;
pub mod jitter;
pub mod policy;
pub mod prelude;
pub mod processor;
pub mod result;
pub mod retry;
pub mod retry_delay;
pub mod service;
pub mod simple;
pub mod sleeper;
pub mod telemetry;

// Re-exports
pub use delegate::Delegate;
pub use error::{
    BoxError, BridgeDirection, BridgeError, CatchBlockError, CatchBlockSource, Canceled,
    ConfigError, FailedReason, NoDelegateError, PolicyError, WrappedPolicyFailed,
};
pub use error_set::{ErrorSet, ErrorSetEntry};
pub use fallback::FallbackPolicy;
pub use filter::{CatchBlockFilter, ErrorFilter, ErrorPredicate};
pub use handler::{FnHandler, HandlerVerdict, ResultHandler, ResultSnapshot};
pub use jitter::Jitter;
pub use policy::{Policy, PolicyKind, WrappedPolicy};
pub use processor::{
    BulkErrorProcessor, CancellationType, ErrorContext, ErrorProcessor, FnProcessor,
    ProcessReport,
};
pub use result::{PolicyResult, WrappedPolicyResult};
pub use retry::{RetryContext, RetryCount, RetryPolicy};
pub use retry_delay::{DelayError, RetryDelay, MAX_DELAY};
pub use service::{PolicyLayer, PolicyService, PolicyServiceError};
pub use simple::SimplePolicy;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use tokio_util::sync::CancellationToken;
