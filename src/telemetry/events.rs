use crate::error::{CatchBlockSource, FailedReason};
use std::fmt;
use std::time::Duration;

#[cfg(feature = "telemetry-json")]
use serde_json::json;

/// Policy events emitted during execution.
///
/// Every policy emits structured events describing its behavior. These events can be collected,
/// aggregated, and used for observability or monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyEvent {
    /// Retry policy events
    Retry(RetryEvent),
    /// Fallback policy events
    Fallback(FallbackEvent),
    /// Error handling events (emitted by all policies)
    Error(ErrorEvent),
    /// Call outcome events (emitted by all policies)
    Request(RequestOutcome),
}

/// Events emitted by retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    /// A retry is about to be made.
    ///
    /// Emitted before waiting for the retry delay.
    Attempt {
        /// The retry number (1-indexed)
        attempt: usize,
        /// The delay before this retry
        delay: Duration,
    },
    /// All retries have been used and the call still fails.
    Exhausted {
        /// Total number of attempts made
        total_attempts: usize,
        /// Total time spent retrying
        total_duration: Duration,
    },
}

/// Events emitted by fallback policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackEvent {
    /// The fallback function produced the result.
    Succeeded,
    /// The fallback function failed.
    Failed {
        /// Whether the call crossed a sync/async bridge to reach the fallback.
        bridged: bool,
    },
    /// No fallback function was registered for the requested value type.
    Missing,
}

/// Events describing how an observed error was treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorEvent {
    /// The filter admitted the error and the processors ran.
    Handled {
        /// Zero-based attempt, for retry policies
        attempt: Option<usize>,
    },
    /// The filter rejected the error.
    FilterRejected,
    /// Secondary machinery failed.
    CatchBlock {
        /// Which part failed
        source: CatchBlockSource,
        /// Whether the failure escalated to the result
        critical: bool,
    },
}

/// Call outcome events emitted by all policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The call completed successfully.
    Success {
        /// Time taken to complete the call
        duration: Duration,
    },
    /// The call failed.
    Failure {
        /// Time taken before failure
        duration: Duration,
        /// Secondary failure reason
        reason: FailedReason,
    },
    /// The call observed cancellation.
    Canceled {
        /// Time taken before cancellation
        duration: Duration,
    },
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (family, inner): (&str, &dyn fmt::Display) = match self {
            PolicyEvent::Retry(event) => ("Retry", event),
            PolicyEvent::Fallback(event) => ("Fallback", event),
            PolicyEvent::Error(event) => ("Error", event),
            PolicyEvent::Request(event) => ("Request", event),
        };
        write!(f, "{family}::{inner}")
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Attempt { attempt, delay } => write!(f, "Attempt(#{attempt}, {delay:?})"),
            RetryEvent::Exhausted { total_attempts, total_duration } => {
                write!(f, "Exhausted(after {total_attempts} attempts, {total_duration:?})")
            }
        }
    }
}

impl fmt::Display for FallbackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackEvent::Succeeded => write!(f, "Succeeded"),
            FallbackEvent::Failed { bridged } => write!(f, "Failed(bridged={})", bridged),
            FallbackEvent::Missing => write!(f, "Missing"),
        }
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorEvent::Handled { attempt: Some(attempt) } => write!(f, "Handled(#{})", attempt),
            ErrorEvent::Handled { attempt: None } => write!(f, "Handled"),
            ErrorEvent::FilterRejected => write!(f, "FilterRejected"),
            ErrorEvent::CatchBlock { source, critical } => {
                write!(f, "CatchBlock({}, critical={})", source, critical)
            }
        }
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOutcome::Success { duration } => write!(f, "Success(duration={:?})", duration),
            RequestOutcome::Failure { duration, reason } => {
                write!(f, "Failure(duration={:?}, reason={:?})", duration, reason)
            }
            RequestOutcome::Canceled { duration } => {
                write!(f, "Canceled(duration={:?})", duration)
            }
        }
    }
}

impl PolicyEvent {
    /// Stable snake_case label, used as the `kind` field of rendered events.
    pub fn kind(&self) -> &'static str {
        match self {
            PolicyEvent::Retry(RetryEvent::Attempt { .. }) => "retry_attempt",
            PolicyEvent::Retry(RetryEvent::Exhausted { .. }) => "retry_exhausted",
            PolicyEvent::Fallback(FallbackEvent::Succeeded) => "fallback_succeeded",
            PolicyEvent::Fallback(FallbackEvent::Failed { .. }) => "fallback_failed",
            PolicyEvent::Fallback(FallbackEvent::Missing) => "fallback_missing",
            PolicyEvent::Error(ErrorEvent::Handled { .. }) => "error_handled",
            PolicyEvent::Error(ErrorEvent::FilterRejected) => "error_filter_rejected",
            PolicyEvent::Error(ErrorEvent::CatchBlock { .. }) => "catch_block_error",
            PolicyEvent::Request(RequestOutcome::Success { .. }) => "request_success",
            PolicyEvent::Request(RequestOutcome::Failure { .. }) => "request_failure",
            PolicyEvent::Request(RequestOutcome::Canceled { .. }) => "request_canceled",
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
#[cfg(feature = "telemetry-json")]
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Render an event as a flat JSON object with a `kind` field and its payload.
#[cfg(feature = "telemetry-json")]
pub fn event_to_json(event: &PolicyEvent) -> serde_json::Value {
    let payload = match event {
        PolicyEvent::Retry(RetryEvent::Attempt { attempt, delay }) => {
            json!({ "attempt": attempt, "delay_ms": millis(*delay) })
        }
        PolicyEvent::Retry(RetryEvent::Exhausted { total_attempts, total_duration }) => {
            json!({ "attempts": total_attempts, "duration_ms": millis(*total_duration) })
        }
        PolicyEvent::Fallback(FallbackEvent::Failed { bridged }) => json!({ "bridged": bridged }),
        PolicyEvent::Fallback(_) | PolicyEvent::Error(ErrorEvent::FilterRejected) => json!({}),
        PolicyEvent::Error(ErrorEvent::Handled { attempt }) => json!({ "attempt": attempt }),
        PolicyEvent::Error(ErrorEvent::CatchBlock { source, critical }) => {
            json!({ "source": source.to_string(), "critical": critical })
        }
        PolicyEvent::Request(RequestOutcome::Success { duration })
        | PolicyEvent::Request(RequestOutcome::Canceled { duration }) => {
            json!({ "duration_ms": millis(*duration) })
        }
        PolicyEvent::Request(RequestOutcome::Failure { duration, reason }) => {
            json!({ "duration_ms": millis(*duration), "reason": format!("{reason:?}") })
        }
    };
    let mut object = serde_json::Map::new();
    object.insert("kind".to_string(), json!(event.kind()));
    if let serde_json::Value::Object(fields) = payload {
        object.extend(fields);
    }
    serde_json::Value::Object(object)
}

#[cfg(all(test, feature = "telemetry-json"))]
mod json_tests {
    use super::*;

    #[test]
    fn retry_attempt_json() {
        let v = event_to_json(&PolicyEvent::Retry(RetryEvent::Attempt {
            attempt: 3,
            delay: Duration::from_millis(150),
        }));
        assert_eq!(v["kind"], "retry_attempt");
        assert_eq!(v["attempt"], 3);
        assert_eq!(v["delay_ms"], 150);
    }

    #[test]
    fn retry_exhausted_json() {
        let v = event_to_json(&PolicyEvent::Retry(RetryEvent::Exhausted {
            total_attempts: 5,
            total_duration: Duration::from_millis(1200),
        }));
        assert_eq!(v["kind"], "retry_exhausted");
        assert_eq!(v["attempts"], 5);
        assert_eq!(v["duration_ms"], 1200);
    }

    #[test]
    fn fallback_failed_json() {
        let v = event_to_json(&PolicyEvent::Fallback(FallbackEvent::Failed { bridged: true }));
        assert_eq!(v["kind"], "fallback_failed");
        assert_eq!(v["bridged"], true);
    }

    #[test]
    fn catch_block_json() {
        let v = event_to_json(&PolicyEvent::Error(ErrorEvent::CatchBlock {
            source: CatchBlockSource::ErrorSaver,
            critical: true,
        }));
        assert_eq!(v["kind"], "catch_block_error");
        assert_eq!(v["source"], "error saver");
        assert_eq!(v["critical"], true);
    }

    #[test]
    fn error_handled_json_without_attempt() {
        let v = event_to_json(&PolicyEvent::Error(ErrorEvent::Handled { attempt: None }));
        assert_eq!(v["kind"], "error_handled");
        assert!(v["attempt"].is_null());
    }

    #[test]
    fn request_failure_json() {
        let v = event_to_json(&PolicyEvent::Request(RequestOutcome::Failure {
            duration: Duration::from_millis(99),
            reason: FailedReason::PolicyResultHandlerFailed,
        }));
        assert_eq!(v["kind"], "request_failure");
        assert_eq!(v["duration_ms"], 99);
        assert_eq!(v["reason"], "PolicyResultHandlerFailed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_event_display() {
        let event = RetryEvent::Attempt { attempt: 2, delay: Duration::from_millis(100) };
        assert!(event.to_string().contains("Attempt"));
        assert!(event.to_string().contains("#2"));
    }

    #[test]
    fn catch_block_event_display() {
        let event = ErrorEvent::CatchBlock { source: CatchBlockSource::PolicyRule, critical: true };
        assert_eq!(event.to_string(), "CatchBlock(policy rule, critical=true)");
    }

    #[test]
    fn kinds_are_snake_case_labels() {
        assert_eq!(PolicyEvent::Fallback(FallbackEvent::Missing).kind(), "fallback_missing");
        assert_eq!(PolicyEvent::Error(ErrorEvent::FilterRejected).kind(), "error_filter_rejected");
    }

    #[test]
    fn request_variants_display() {
        let ok =
            PolicyEvent::Request(RequestOutcome::Success { duration: Duration::from_millis(5) });
        let err = PolicyEvent::Request(RequestOutcome::Failure {
            duration: Duration::from_millis(7),
            reason: FailedReason::None,
        });
        let canceled =
            PolicyEvent::Request(RequestOutcome::Canceled { duration: Duration::from_millis(1) });
        assert!(ok.to_string().contains("Success"));
        assert!(err.to_string().contains("Failure"));
        assert!(canceled.to_string().starts_with("Request::Canceled"));
    }
}
