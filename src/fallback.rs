//! Fallback policy implementation
//!
//! Invokes the delegate once; when the error is handled, a fallback function registered for the
//! call's value type supplies the result instead.
//!
//! Semantics:
//! - Fallback functions are registered per value type `T` (`()` for the calls without a value),
//!   as a blocking function, an asynchronous one, or both.
//! - Synchronous calls prefer the blocking function and asynchronous calls the asynchronous one.
//!   When only the other flavor exists the call crosses the sync/async bridge; a failure on that
//!   path is exposed as a [`BridgeError`] in `critical_error`.
//! - A call whose value type has no registered function ends with no value and is not failed.
//! - A failing fallback fails the result with [`FailedReason::PolicyProcessorFailed`], records a
//!   critical catch-block error and keeps the fallback's error as `unprocessed_error`.
//!
//! ```rust
//! use catchpoint::{FallbackPolicy, Policy};
//!
//! let policy = FallbackPolicy::new().with_fallback_fn(|| String::from("cached"));
//! let result = policy.execute_value(|| Err::<String, _>("origin down"));
//!
//! assert!(result.is_success());
//! assert_eq!(result.result().map(String::as_str), Some("cached"));
//! assert_eq!(result.errors().len(), 1);
//! ```

use crate::engine::{
    self, AttemptFailure, CallScope, Disposition, ExecMode, Invocation, Sealed, Strategy,
};
use crate::error::{
    into_policy_error, BoxError, BridgeDirection, BridgeError, CatchBlockError, CatchBlockSource,
    FailedReason,
};
use crate::policy::{Policy, PolicyCore, PolicyKind};
use crate::result::PolicyResult;
use crate::telemetry::{FallbackEvent, PolicyEvent};
use futures::future::BoxFuture;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type BlockingFallback<T> =
    Arc<dyn Fn(&CancellationToken) -> Result<T, BoxError> + Send + Sync>;
type AsyncFallback<T> =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<T, BoxError>> + Send + Sync>;

struct FallbackFns<T> {
    blocking: Option<BlockingFallback<T>>,
    asynchronous: Option<AsyncFallback<T>>,
}

impl<T> Clone for FallbackFns<T> {
    fn clone(&self) -> Self {
        Self { blocking: self.blocking.clone(), asynchronous: self.asynchronous.clone() }
    }
}

impl<T> Default for FallbackFns<T> {
    fn default() -> Self {
        Self { blocking: None, asynchronous: None }
    }
}

/// Fallback functions keyed by value type.
#[derive(Clone, Default)]
struct FallbackRegistry {
    by_type: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl FallbackRegistry {
    fn get<T: Send + Sync + 'static>(&self) -> Option<&FallbackFns<T>> {
        self.by_type.get(&TypeId::of::<T>()).and_then(|fns| fns.downcast_ref::<FallbackFns<T>>())
    }

    fn update<T: Send + Sync + 'static>(&mut self, f: impl FnOnce(&mut FallbackFns<T>)) {
        let mut fns = self.get::<T>().cloned().unwrap_or_default();
        f(&mut fns);
        self.by_type.insert(TypeId::of::<T>(), Arc::new(fns));
    }
}

/// Fallback policy: one attempt, then a per-type fallback function.
#[derive(Clone)]
pub struct FallbackPolicy {
    core: PolicyCore,
    fallbacks: FallbackRegistry,
}

impl fmt::Debug for FallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackPolicy")
            .field("core", &self.core)
            .field("fallback_types", &self.fallbacks.by_type.len())
            .finish()
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackPolicy {
    /// Policy with no fallback functions yet.
    pub fn new() -> Self {
        Self { core: PolicyCore::new(PolicyKind::Fallback), fallbacks: FallbackRegistry::default() }
    }

    /// Register a blocking, token-aware, fallible fallback for calls producing `T`.
    ///
    /// Replaces a previous blocking fallback for `T`.
    pub fn with_fallback<T, F, E>(mut self, f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&CancellationToken) -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let f: BlockingFallback<T> =
            Arc::new(move |token: &CancellationToken| f(token).map_err(Into::into));
        self.fallbacks.update::<T>(|fns| fns.blocking = Some(f));
        self
    }

    /// Register an infallible fallback producing `T`.
    pub fn with_fallback_fn<T, F>(self, f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.with_fallback(move |_token: &CancellationToken| Ok::<T, BoxError>(f()))
    }

    /// Register an asynchronous fallback for calls producing `T`.
    ///
    /// Replaces a previous asynchronous fallback for `T`.
    pub fn with_async_fallback<T, F, Fut, E>(mut self, f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let f: AsyncFallback<T> = Arc::new(
            move |token: CancellationToken| -> BoxFuture<'static, Result<T, BoxError>> {
                let fut = f(token);
                Box::pin(async move { fut.await.map_err(Into::into) })
            },
        );
        self.fallbacks.update::<T>(|fns| fns.asynchronous = Some(f));
        self
    }

    /// Whether any fallback is registered for `T`.
    pub fn has_fallback<T: Send + Sync + 'static>(&self) -> bool {
        self.fallbacks.get::<T>().is_some()
    }

    /// Whether an asynchronous fallback is registered for `T`.
    pub fn has_async_fallback<T: Send + Sync + 'static>(&self) -> bool {
        self.fallbacks.get::<T>().is_some_and(|fns| fns.asynchronous.is_some())
    }

    pub(crate) async fn run<T>(&self, inv: &mut Invocation<'_, '_, T>) -> PolicyResult<T>
    where
        T: Send + Sync + 'static,
    {
        let core = &self.core;
        let mut result = PolicyResult::new(core.name.clone());

        let (error, recorded) = match engine::attempt(core, inv, &mut result).await {
            Ok(value) => {
                result.set_value(value);
                return result;
            }
            Err(AttemptFailure::Canceled) => {
                result.set_canceled();
                return result;
            }
            Err(AttemptFailure::Failed { error, recorded }) => (error, recorded),
        };

        match engine::handle_error(core, &error, recorded, None, inv.scope(), &mut result).await {
            Disposition::Handled => {}
            Disposition::Canceled => {
                result.set_canceled();
                return result;
            }
            Disposition::Rejected | Disposition::SaverFailed => return result,
        }

        if inv.token.is_cancelled() {
            result.set_canceled();
            return result;
        }

        self.invoke_fallback(inv.scope(), &mut result).await;
        result
    }

    async fn invoke_fallback<T>(&self, scope: CallScope<'_>, result: &mut PolicyResult<T>)
    where
        T: Send + Sync + 'static,
    {
        let core = &self.core;
        let fns = self.fallbacks.get::<T>();
        let call = match (scope.mode, fns) {
            (_, None) => None,
            (ExecMode::Blocking, Some(fns)) => match (&fns.blocking, &fns.asynchronous) {
                (Some(f), _) => Some((f(scope.token), None)),
                (None, Some(f)) => {
                    Some((f(scope.token.clone()).await, Some(BridgeDirection::SyncOverAsync)))
                }
                (None, None) => None,
            },
            (ExecMode::Async, Some(fns)) => match (&fns.asynchronous, &fns.blocking) {
                (Some(f), _) => Some((f(scope.token.clone()).await, None)),
                (None, Some(f)) => Some((f(scope.token), Some(BridgeDirection::AsyncOverSync))),
                (None, None) => None,
            },
        };

        let Some((outcome, bridge)) = call else {
            tracing::debug!(
                policy = %core.name,
                value_type = std::any::type_name::<T>(),
                "no fallback registered for value type"
            );
            core.emit(PolicyEvent::Fallback(FallbackEvent::Missing)).await;
            return;
        };

        match outcome {
            Ok(value) => {
                tracing::debug!(policy = %core.name, bridged = bridge.is_some(), "fallback used");
                result.set_value(Some(value));
                result.set_ok();
                core.emit(PolicyEvent::Fallback(FallbackEvent::Succeeded)).await;
            }
            Err(failure) => {
                let failure = into_policy_error(failure);
                tracing::warn!(policy = %core.name, error = %failure, "fallback failed");
                result.add_catch_block_error(CatchBlockError::new(
                    failure.clone(),
                    CatchBlockSource::PolicyRule,
                    true,
                ));
                result.set_failed_reason(FailedReason::PolicyProcessorFailed);
                result.set_unprocessed_error(failure.clone());
                if let Some(direction) = bridge {
                    result.set_critical_error(Arc::new(BridgeError::new(direction, failure)));
                }
                result.set_failed();
                if scope.token.is_cancelled() {
                    result.set_canceled();
                }
                core.emit(PolicyEvent::Fallback(FallbackEvent::Failed {
                    bridged: bridge.is_some(),
                }))
                .await;
            }
        }
    }
}

impl Sealed for FallbackPolicy {
    fn strategy(&self) -> Strategy<'_> {
        Strategy::Fallback(self)
    }
}

impl Policy for FallbackPolicy {
    fn core(&self) -> &PolicyCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PolicyCore {
        &mut self.core
    }
}
