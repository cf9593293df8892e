//! Single-attempt policy.
//!
//! Invokes the delegate once. A failure admitted by the filter is recorded and processed and the
//! result stays successful with no value; a failure rejected by the filter fails the result. This
//! is the policy to reach for when an error should be observed (logged, saved, counted) but
//! neither retried nor replaced.
//!
//! ```rust
//! use catchpoint::{Policy, PolicyError, SimplePolicy};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = seen.clone();
//! let policy = SimplePolicy::new().with_error_processor(move |_e: &PolicyError| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! let result = policy.execute(|| Err("disk full"));
//! assert!(result.is_success());
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! ```

use crate::engine::{self, AttemptFailure, Disposition, Invocation, Sealed, Strategy};
use crate::policy::{Policy, PolicyCore, PolicyKind};
use crate::result::PolicyResult;

/// Policy making exactly one attempt.
#[derive(Debug, Clone)]
pub struct SimplePolicy {
    core: PolicyCore,
}

impl Default for SimplePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SimplePolicy {
    /// New single-attempt policy.
    pub fn new() -> Self {
        Self { core: PolicyCore::new(PolicyKind::Simple) }
    }

    pub(crate) async fn run<T>(&self, inv: &mut Invocation<'_, '_, T>) -> PolicyResult<T>
    where
        T: Send + Sync + 'static,
    {
        let core = &self.core;
        let mut result = PolicyResult::new(core.name.clone());

        match engine::attempt(core, inv, &mut result).await {
            Ok(value) => result.set_value(value),
            Err(AttemptFailure::Canceled) => result.set_canceled(),
            Err(AttemptFailure::Failed { error, recorded }) => {
                let scope = inv.scope();
                match engine::handle_error(core, &error, recorded, None, scope, &mut result).await {
                    Disposition::Canceled => result.set_canceled(),
                    Disposition::Handled | Disposition::Rejected | Disposition::SaverFailed => {}
                }
            }
        }
        result
    }
}

impl Sealed for SimplePolicy {
    fn strategy(&self) -> Strategy<'_> {
        Strategy::Simple(self)
    }
}

impl Policy for SimplePolicy {
    fn core(&self) -> &PolicyCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PolicyCore {
        &mut self.core
    }
}
