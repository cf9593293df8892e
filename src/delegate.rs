//! The operation a policy protects.
//!
//! A [`Delegate`] is either blocking or asynchronous and may observe the call's
//! [`CancellationToken`]. Synchronous entry points accept only blocking delegates; asynchronous
//! entry points accept both and run blocking ones inline.

use crate::error::{into_policy_error, BoxError, PolicyError};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

type BlockingFn<'d, T> = Box<dyn FnMut(&CancellationToken) -> Result<T, BoxError> + Send + 'd>;
type AsyncFn<'d, T> =
    Box<dyn FnMut(CancellationToken) -> BoxFuture<'d, Result<T, BoxError>> + Send + 'd>;

enum DelegateFn<'d, T> {
    Blocking(BlockingFn<'d, T>),
    Async(AsyncFn<'d, T>),
}

/// Operation invoked once per attempt.
pub struct Delegate<'d, T> {
    f: DelegateFn<'d, T>,
}

impl<T> fmt::Debug for Delegate<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delegate").field("is_async", &self.is_async()).finish()
    }
}

impl<'d, T> Delegate<'d, T> {
    /// Blocking operation.
    pub fn blocking<F, E>(mut f: F) -> Self
    where
        F: FnMut() -> Result<T, E> + Send + 'd,
        E: Into<BoxError>,
        T: 'd,
    {
        let f: BlockingFn<'d, T> =
            Box::new(move |_token: &CancellationToken| -> Result<T, BoxError> {
                f().map_err(Into::into)
            });
        Self { f: DelegateFn::Blocking(f) }
    }

    /// Blocking operation that observes the call's token.
    pub fn blocking_with_token<F, E>(mut f: F) -> Self
    where
        F: FnMut(&CancellationToken) -> Result<T, E> + Send + 'd,
        E: Into<BoxError>,
        T: 'd,
    {
        let f: BlockingFn<'d, T> =
            Box::new(move |token: &CancellationToken| -> Result<T, BoxError> {
                f(token).map_err(Into::into)
            });
        Self { f: DelegateFn::Blocking(f) }
    }

    /// Asynchronous operation.
    pub fn from_async<F, Fut, E>(mut f: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'd,
        Fut: Future<Output = Result<T, E>> + Send + 'd,
        E: Into<BoxError> + 'd,
        T: 'd,
    {
        Self::from_async_with_token(move |_token| f())
    }

    /// Asynchronous operation that receives a handle to the call's token.
    pub fn from_async_with_token<F, Fut, E>(mut f: F) -> Self
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'd,
        Fut: Future<Output = Result<T, E>> + Send + 'd,
        E: Into<BoxError> + 'd,
        T: 'd,
    {
        let f: AsyncFn<'d, T> = Box::new(
            move |token: CancellationToken| -> BoxFuture<'d, Result<T, BoxError>> {
                let fut = f(token);
                Box::pin(async move { fut.await.map_err(Into::into) })
            },
        );
        Self { f: DelegateFn::Async(f) }
    }

    /// Whether the operation is asynchronous.
    pub fn is_async(&self) -> bool {
        matches!(self.f, DelegateFn::Async(_))
    }

    pub(crate) async fn invoke(&mut self, token: &CancellationToken) -> Result<T, PolicyError> {
        match &mut self.f {
            DelegateFn::Blocking(f) => f(token).map_err(into_policy_error),
            DelegateFn::Async(f) => f(token.clone()).await.map_err(into_policy_error),
        }
    }
}
