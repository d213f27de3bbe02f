//! Handler dispatch
//!
//! Generated handlers call into the [`Dispatcher`] once routing has picked
//! the endpoint. The dispatcher evaluates the endpoint's rule, runs the
//! handler under the call deadline, and maps any failure to the caller.

use crate::authrules::EndpointRules;
use crate::error::{CallError, ErrorMapper, ErrorResponse, map_call_error};
use crate::middleware::{CallContext, CallResponder, JsonResponder};
use axum::Json;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tonic::Status;
use tracing::{debug, error};

/// Authorizes and runs handlers.
#[derive(Clone)]
pub struct Dispatcher {
    rules: Arc<EndpointRules>,
    mapper: Option<Arc<dyn ErrorMapper>>,
    default_timeout: Option<Duration>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("rules", &self.rules.len())
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher enforcing `rules`
    #[must_use]
    pub const fn new(rules: Arc<EndpointRules>) -> Self {
        Self {
            rules,
            mapper: None,
            default_timeout: None,
        }
    }

    /// Map errors with `mapper`
    #[must_use]
    pub fn with_error_mapper(mut self, mapper: Option<Arc<dyn ErrorMapper>>) -> Self {
        self.mapper = mapper;
        self
    }

    /// Deadline for calls that arrive without a context
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Rules enforced by this dispatcher
    #[must_use]
    pub fn rules(&self) -> &EndpointRules {
        &self.rules
    }

    /// Authorize `endpoint` and run `handler` within the call deadline.
    ///
    /// # Errors
    ///
    /// The denial, [`CallError::DeadlineExceeded`], or the handler's error.
    pub async fn call<T, F, Fut>(
        &self,
        endpoint: &str,
        ctx: CallContext,
        handler: F,
    ) -> Result<T, CallError>
    where
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let deadline = ctx.deadline();
        let run = async {
            self.rules.authorize(endpoint, &ctx).await?;
            handler(ctx.clone()).await.map_err(CallError::Handler)
        };
        let result = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, run)
                .await
                .unwrap_or(Err(CallError::DeadlineExceeded)),
            None => run.await,
        };
        if let Err(err) = &result {
            log_failure(endpoint, &ctx, err);
        }
        result
    }

    /// Dispatch a unary gRPC call.
    ///
    /// # Errors
    ///
    /// The mapped [`Status`] when the call is denied, times out or fails.
    pub async fn unary<Req, Resp, F, Fut>(
        &self,
        endpoint: &str,
        request: tonic::Request<Req>,
        handler: F,
    ) -> Result<tonic::Response<Resp>, Status>
    where
        F: FnOnce(CallContext, Req) -> Fut,
        Fut: Future<Output = anyhow::Result<Resp>>,
    {
        let ctx = request.extensions().get::<CallContext>().cloned().unwrap_or_else(|| {
            CallContext::new(
                endpoint,
                request.metadata().clone().into_headers(),
                self.default_timeout,
            )
        });
        let message = request.into_inner();
        match self.call(endpoint, ctx.clone(), |ctx| handler(ctx, message)).await {
            Ok(response) => Ok(tonic::Response::new(response)),
            Err(err) => Err(self.map_error(&ctx, &err).to_status()),
        }
    }

    /// Dispatch a REST call, rendering the result as JSON
    pub async fn rest<T, F, Fut>(&self, endpoint: &str, ctx: CallContext, handler: F) -> Response
    where
        T: Serialize,
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        match self.call(endpoint, ctx.clone(), handler).await {
            Ok(body) => Json(body).into_response(),
            Err(err) => JsonResponder.respond(&self.map_error(&ctx, &err)),
        }
    }

    fn map_error(&self, ctx: &CallContext, err: &CallError) -> ErrorResponse {
        map_call_error(self.mapper.as_deref(), ctx, err)
    }
}

fn log_failure(endpoint: &str, ctx: &CallContext, err: &CallError) {
    match err {
        CallError::Unauthenticated(_) | CallError::Unauthorized { .. } => debug!(
            endpoint = %endpoint,
            correlation_id = %ctx.correlation_id(),
            error = %err,
            "Call denied"
        ),
        CallError::DeadlineExceeded => debug!(
            endpoint = %endpoint,
            correlation_id = %ctx.correlation_id(),
            "Call exceeded its deadline"
        ),
        _ => error!(
            endpoint = %endpoint,
            correlation_id = %ctx.correlation_id(),
            error = ?err,
            "Handler failed"
        ),
    }
}
