//! Interceptor chain
//!
//! Interceptors run in a fixed order: the logger interceptor first, then the
//! service's interceptors in registration order, then the trace-id
//! interceptor. Each interceptor decides whether and when to call the rest
//! of the chain through [`Next`].

use super::context::CallContext;
use crate::error::CallError;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Result of running the chain for one call
pub type CallResult = Result<(), CallError>;

type Terminal<'a> = Box<dyn FnOnce(CallContext) -> BoxFuture<'a, CallResult> + Send + 'a>;

/// Wraps every inbound call.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Name used in logs and diagnostics
    fn name(&self) -> &str;

    /// Handle a call. Call `next.run(ctx)` to continue the chain; returning
    /// without doing so rejects the call.
    async fn intercept(&self, ctx: CallContext, next: Next<'_>) -> CallResult;
}

/// The remainder of the chain.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Interceptor>],
    terminal: Terminal<'a>,
}

impl Next<'_> {
    /// Run the remaining interceptors and then the handler
    pub async fn run(self, ctx: CallContext) -> CallResult {
        match self.remaining.split_first() {
            Some((first, rest)) => {
                first
                    .intercept(
                        ctx,
                        Next {
                            remaining: rest,
                            terminal: self.terminal,
                        },
                    )
                    .await
            }
            None => (self.terminal)(ctx).await,
        }
    }
}

/// An ordered, immutable list of interceptors.
#[derive(Clone)]
pub struct InterceptorChain {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl InterceptorChain {
    /// Chain of exactly `interceptors`, in order
    #[must_use]
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors: interceptors.into(),
        }
    }

    /// Interceptor names, in order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    /// Number of interceptors
    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Whether the chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run the chain, finishing with `terminal`
    pub async fn run<'a, F, Fut>(&'a self, ctx: CallContext, terminal: F) -> CallResult
    where
        F: FnOnce(CallContext) -> Fut + Send + 'a,
        Fut: Future<Output = CallResult> + Send + 'a,
    {
        Next {
            remaining: &self.interceptors,
            terminal: Box::new(move |ctx| terminal(ctx).boxed()),
        }
        .run(ctx)
        .await
    }
}

/// Compose the chain: `base` first, then `user` in registration order, then `trace`.
#[must_use]
pub fn compose(
    base: Arc<dyn Interceptor>,
    user: &[Arc<dyn Interceptor>],
    trace: Arc<dyn Interceptor>,
) -> InterceptorChain {
    let mut interceptors = Vec::with_capacity(user.len() + 2);
    interceptors.push(base);
    interceptors.extend(user.iter().cloned());
    // TODO: move trace-id injection ahead of the user interceptors once
    // existing services no longer depend on seeing calls without a trace id.
    interceptors.push(trace);
    InterceptorChain::new(interceptors)
}
