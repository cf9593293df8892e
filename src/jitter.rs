//! Jitter strategies for retry delays.
//!
//! When to use which strategy:
//! - `None`: deterministic delays for tests or tightly controlled workflows.
//! - `Full`: uniform in `[0, delay]`, a good default to spread concurrent retries apart.
//! - `Equal`: uniform in `[delay/2, delay]`, keeps a floor while adding randomness.
//!
//! Notes:
//! - RNG: uses `rand`'s thread-local RNG by default; deterministic RNGs can be injected via
//!   `apply_with_rng`.
//! - Precision: jitter works in nanoseconds, so sub-millisecond delays keep their spread;
//!   durations beyond `u64::MAX` nanoseconds (about 584 years) saturate.
//!
//! Example:
//! ```rust
//! use catchpoint::{Jitter, RetryDelay};
//! use std::time::Duration;
//!
//! let delay = RetryDelay::constant(Duration::from_millis(100)).with_jitter(Jitter::full());
//! assert_eq!(delay.jitter(), Jitter::Full);
//! ```

use rand::{rng, Rng};
use std::time::Duration;

/// Randomization applied on top of a computed retry delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Keep the computed delay as is.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay / 2, delay]`.
    Equal,
}

impl Jitter {
    /// Shorthand for [`Jitter::Full`].
    pub fn full() -> Self {
        Jitter::Full
    }

    /// Shorthand for [`Jitter::Equal`].
    pub fn equal() -> Self {
        Jitter::Equal
    }

    /// Randomize `delay` with the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Randomize `delay` with a caller-supplied RNG, e.g. a seeded one in tests.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let ceiling = as_nanos_saturated(delay);
        let floor = match self {
            Jitter::None => return delay,
            Jitter::Full => 0,
            Jitter::Equal => ceiling / 2,
        };
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rng.random_range(floor..=ceiling))
    }
}

fn as_nanos_saturated(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
