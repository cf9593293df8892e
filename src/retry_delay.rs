//! Retry delay strategies.
//!
//! A [`RetryDelay`] maps `(attempt, error)` to the time to wait before the next attempt. Attempt
//! semantics: attempt index `0` represents the initial call (no delay), and retries start at
//! `attempt = 1`. Delays saturate at [`MAX_DELAY`] instead of overflowing.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use catchpoint::RetryDelay;
//!
//! let delay = RetryDelay::exponential(Duration::from_millis(100))
//!     .with_max(Duration::from_secs(2))
//!     .unwrap();
//! let err: catchpoint::PolicyError = std::sync::Arc::new(std::fmt::Error);
//! assert_eq!(delay.delay(0, &err), Duration::ZERO); // initial call
//! assert_eq!(delay.delay(1, &err), Duration::from_millis(100));
//! assert_eq!(delay.delay(2, &err), Duration::from_millis(200));
//! assert_eq!(delay.delay(6, &err), Duration::from_secs(2)); // capped
//! ```

use crate::error::PolicyError;
use crate::Jitter;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by retry delay configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DelayError {
    /// `with_max` only applies to growing delays.
    #[error("with_max is only valid for linear or exponential delays")]
    ConstantDoesNotSupportMax,
    /// A zero cap would disable waiting entirely.
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    /// The cap must not undercut the first delay.
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase {
        /// Configured base delay.
        base: Duration,
        /// Rejected cap.
        max: Duration,
    },
    /// Growth factors must be finite and positive.
    #[error("factor must be finite and > 0")]
    InvalidFactor,
    /// `with_factor` only applies to linear and exponential delays.
    #[error("with_factor is only valid for linear or exponential delays")]
    FactorNotSupported,
}

/// Custom delay function: `(attempt, error) -> wait`.
pub type DelayFn = Arc<dyn Fn(usize, &PolicyError) -> Duration + Send + Sync>;

#[derive(Clone)]
enum DelayKind {
    Constant { delay: Duration },
    Linear { base: Duration, slope: f64, max: Option<Duration> },
    Exponential { base: Duration, factor: f64, max: Option<Duration> },
    Custom(DelayFn),
}

impl fmt::Debug for DelayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant { delay } => f.debug_struct("Constant").field("delay", delay).finish(),
            Self::Linear { base, slope, max } => f
                .debug_struct("Linear")
                .field("base", base)
                .field("slope", slope)
                .field("max", max)
                .finish(),
            Self::Exponential { base, factor, max } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("factor", factor)
                .field("max", max)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

fn scaled(base: Duration, multiplier: f64) -> Duration {
    let nanos = base.as_nanos() as f64 * multiplier;
    if !nanos.is_finite() || nanos >= MAX_DELAY.as_nanos() as f64 {
        return MAX_DELAY;
    }
    Duration::from_nanos(nanos.round().max(0.0) as u64)
}

impl DelayKind {
    fn delay(&self, attempt: usize, error: &PolicyError) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let raw = match self {
            Self::Constant { delay } => *delay,
            Self::Linear { base, slope, max } => {
                let attempt_u32 = attempt.min(u32::MAX as usize) as u32;
                let linear = if *slope == 1.0 {
                    base.checked_mul(attempt_u32).unwrap_or(MAX_DELAY)
                } else {
                    scaled(*base, f64::from(attempt_u32) * slope)
                };
                max.map(|m| linear.min(m)).unwrap_or(linear)
            }
            Self::Exponential { base, factor, max } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
                let exp_delay = scaled(*base, factor.powi(exponent));
                max.map(|m| exp_delay.min(m)).unwrap_or(exp_delay)
            }
            Self::Custom(f) => f(attempt, error),
        };
        raw.min(MAX_DELAY)
    }
}

/// Delay applied between retry attempts.
#[derive(Debug, Clone)]
pub struct RetryDelay {
    kind: DelayKind,
    jitter: Jitter,
}

impl RetryDelay {
    /// Same wait before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { kind: DelayKind::Constant { delay }, jitter: Jitter::None }
    }

    /// `base * attempt` (times the slope factor, default 1).
    pub fn linear(base: Duration) -> Self {
        Self { kind: DelayKind::Linear { base, slope: 1.0, max: None }, jitter: Jitter::None }
    }

    /// `base * factor^(attempt - 1)` (factor defaults to 2).
    pub fn exponential(base: Duration) -> Self {
        Self {
            kind: DelayKind::Exponential { base, factor: 2.0, max: None },
            jitter: Jitter::None,
        }
    }

    /// Delay computed by a caller-supplied function of the attempt and the error that caused it.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(usize, &PolicyError) -> Duration + Send + Sync + 'static,
    {
        Self { kind: DelayKind::Custom(Arc::new(f)), jitter: Jitter::None }
    }

    /// Cap a linear or exponential delay.
    /// Returns an error for constant/custom delays, if `max` is zero, or if `max < base`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, DelayError> {
        if max.is_zero() {
            return Err(DelayError::MaxMustBePositive);
        }
        match &mut self.kind {
            DelayKind::Linear { base, max: existing, .. }
            | DelayKind::Exponential { base, max: existing, .. } => {
                if max < *base {
                    return Err(DelayError::MaxLessThanBase { base: *base, max });
                }
                *existing = Some(max);
                Ok(self)
            }
            DelayKind::Constant { .. } | DelayKind::Custom(_) => {
                Err(DelayError::ConstantDoesNotSupportMax)
            }
        }
    }

    /// Set the slope (linear) or growth factor (exponential).
    pub fn with_factor(mut self, factor: f64) -> Result<Self, DelayError> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(DelayError::InvalidFactor);
        }
        match &mut self.kind {
            DelayKind::Linear { slope, .. } => *slope = factor,
            DelayKind::Exponential { factor: existing, .. } => *existing = factor,
            DelayKind::Constant { .. } | DelayKind::Custom(_) => {
                return Err(DelayError::FactorNotSupported)
            }
        }
        Ok(self)
    }

    /// Randomize each computed delay.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Configured jitter.
    pub fn jitter(&self) -> Jitter {
        self.jitter
    }

    /// Wait before retry number `attempt` (0 = initial call, no delay).
    pub fn delay(&self, attempt: usize, error: &PolicyError) -> Duration {
        self.jitter.apply(self.kind.delay(attempt, error))
    }
}
