//! Tower-native integration.
//!
//! [`PolicyLayer`] wraps any `tower::Service` so each request runs through a policy's
//! asynchronous call path: every attempt drives a fresh clone of the inner service to readiness
//! and calls it with a clone of the request.
//!
//! ```rust
//! use catchpoint::service::PolicyLayer;
//! use catchpoint::{InstantSleeper, RetryPolicy};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use tower::{service_fn, Layer, ServiceExt};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let calls = Arc::new(AtomicUsize::new(0));
//! let counter = calls.clone();
//! let inner = service_fn(move |req: u32| {
//!     let attempt = counter.fetch_add(1, Ordering::SeqCst);
//!     async move {
//!         if attempt == 0 { Err("cold start") } else { Ok(req * 2) }
//!     }
//! });
//!
//! let svc = PolicyLayer::new(RetryPolicy::new(2).with_sleeper(InstantSleeper)).layer(inner);
//! assert_eq!(svc.oneshot(21).await.unwrap(), 42);
//! assert_eq!(calls.load(Ordering::SeqCst), 2);
//! # });
//! ```

use crate::error::{BoxError, PolicyError};
use crate::policy::Policy;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// Why a policy-wrapped service produced no response.
#[derive(Debug, thiserror::Error)]
pub enum PolicyServiceError {
    /// The inner service failed while becoming ready.
    #[error("inner service unavailable: {0}")]
    Unavailable(#[source] BoxError),
    /// The call observed cancellation.
    #[error("call through policy `{policy}` was canceled")]
    Canceled {
        /// Name of the policy.
        policy: String,
    },
    /// The policy finished without a response.
    #[error("policy `{policy}` produced no response")]
    NoResponse {
        /// Name of the policy.
        policy: String,
        /// The last error the inner service returned.
        #[source]
        last_error: Option<PolicyError>,
    },
}

/// Layer applying a policy to every request of the wrapped service.
#[derive(Debug)]
pub struct PolicyLayer<P> {
    policy: Arc<P>,
    token: CancellationToken,
}

impl<P> Clone for PolicyLayer<P> {
    fn clone(&self) -> Self {
        Self { policy: self.policy.clone(), token: self.token.clone() }
    }
}

impl<P: Policy> PolicyLayer<P> {
    /// Layer running requests through `policy`.
    pub fn new(policy: P) -> Self {
        Self { policy: Arc::new(policy), token: CancellationToken::new() }
    }

    /// Derive every request's token from `token`, so canceling it cancels in-flight calls.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }
}

impl<S, P> Layer<S> for PolicyLayer<P> {
    type Service = PolicyService<S, P>;

    fn layer(&self, inner: S) -> Self::Service {
        PolicyService { inner, policy: self.policy.clone(), token: self.token.clone() }
    }
}

/// Service produced by [`PolicyLayer`].
#[derive(Debug)]
pub struct PolicyService<S, P> {
    inner: S,
    policy: Arc<P>,
    token: CancellationToken,
}

impl<S: Clone, P> Clone for PolicyService<S, P> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), policy: self.policy.clone(), token: self.token.clone() }
    }
}

async fn call_inner<S, Request>(
    mut svc: S,
    req: Request,
    readied: bool,
) -> Result<S::Response, BoxError>
where
    S: Service<Request>,
    S::Error: Into<BoxError>,
{
    if !readied {
        svc.ready().await.map_err(Into::into)?;
    }
    svc.call(req).await.map_err(Into::into)
}

impl<S, P, Request> Service<Request> for PolicyService<S, P>
where
    Request: Clone + Send + 'static,
    S: Service<Request> + Clone + Send + 'static,
    S::Response: Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    P: Policy,
{
    type Response = S::Response;
    type Error = PolicyServiceError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(|e| PolicyServiceError::Unavailable(e.into()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let policy = self.policy.clone();
        // the instance readied by `poll_ready` serves the first attempt, retries get clones
        let template = self.inner.clone();
        let mut readied = Some(std::mem::replace(&mut self.inner, template.clone()));
        let token = self.token.child_token();
        Box::pin(async move {
            let attempt = move || match readied.take() {
                Some(svc) => call_inner(svc, req.clone(), true),
                None => call_inner(template.clone(), req.clone(), false),
            };
            let result = policy.execute_value_async(attempt, token).await;
            if result.is_canceled() {
                return Err(PolicyServiceError::Canceled { policy: policy.name().to_string() });
            }
            let policy_name = result.policy_name().to_string();
            let last_error = result.last_error().cloned();
            result
                .into_result()
                .ok_or(PolicyServiceError::NoResponse { policy: policy_name, last_error })
        })
    }
}
