//! Telemetry for policy executions.
//!
//! Policies emit structured [`PolicyEvent`]s to an optional sink attached with
//! [`Policy::with_telemetry`](crate::Policy::with_telemetry). Emission is best effort: sink
//! failures never affect the call.
//!
//! # Event Types
//!
//! - **Retry**: `Attempt`, `Exhausted`
//! - **Fallback**: `Succeeded`, `Failed`, `Missing`
//! - **All policies**: `Error` (handled, filter-rejected, catch-block failures) and `Request`
//!   (success, failure, canceled)
//!
//! # Telemetry Sinks
//!
//! Sinks are `tower::Service<PolicyEvent>` implementations, so any tower middleware composes
//! with them.
//!
//! ```rust
//! use catchpoint::telemetry::{MemorySink, PolicyEvent, RetryEvent};
//! use catchpoint::{InstantSleeper, Policy, RetryPolicy};
//!
//! let sink = MemorySink::new();
//! let policy = RetryPolicy::new(2).with_sleeper(InstantSleeper).with_telemetry(sink.clone());
//! let _ = policy.execute(|| Err::<(), _>("down"));
//!
//! let retries = sink
//!     .events()
//!     .into_iter()
//!     .filter(|e| matches!(e, PolicyEvent::Retry(RetryEvent::Attempt { .. })))
//!     .count();
//! assert_eq!(retries, 2);
//! ```

pub mod events;
pub mod sinks;

pub use events::{ErrorEvent, FallbackEvent, PolicyEvent, RequestOutcome, RetryEvent};
#[cfg(feature = "telemetry-json")]
pub use events::event_to_json;
pub use sinks::{boxed_sink, emit_best_effort, LogSink, MemorySink, NullSink, PolicySink};
