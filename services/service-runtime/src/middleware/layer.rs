//! Call boundary Tower layer
//!
//! Runs the interceptor chain around the wrapped service. This is where a
//! call's deadline is enforced and where a panic raised while serving a call
//! is caught and turned into an error response; the connection and the
//! server keep running.

use super::chain::{CallResult, InterceptorChain};
use super::context::CallContext;
use crate::error::{CallError, ErrorMapper, ErrorResponse, map_call_error};
use crate::observability::RuntimeMetrics;
use futures::FutureExt;
use futures::future::BoxFuture;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Request, Response};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{Layer, Service, ServiceExt};
use tracing::{error, warn};

/// Renders an error response in a transport's wire format.
pub trait CallResponder<B>: Clone + Send + Sync + 'static {
    /// Build the response for `error`
    fn respond(&self, error: &ErrorResponse) -> Response<B>;
}

/// gRPC trailers-only error responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcResponder;

impl<B: Default> CallResponder<B> for GrpcResponder {
    fn respond(&self, error: &ErrorResponse) -> Response<B> {
        let status = error.to_status();
        let mut response = Response::new(B::default());
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
        headers.insert("grpc-status", HeaderValue::from(i32::from(status.code())));
        if let Ok(message) = HeaderValue::from_str(&percent_encode(status.message())) {
            headers.insert("grpc-message", message);
        }
        response
    }
}

/// JSON error bodies for HTTP transports.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonResponder;

impl<B: From<String>> CallResponder<B> for JsonResponder {
    fn respond(&self, error: &ErrorResponse) -> Response<B> {
        let mut response = Response::new(B::from(error.to_json()));
        *response.status_mut() = error.code.http_status();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

/// Percent-encoding used by `grpc-message`
fn percent_encode(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for byte in message.bytes() {
        if (0x20..0x7f).contains(&byte) && byte != b'%' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

struct Shared {
    chain: InterceptorChain,
    mapper: Option<Arc<dyn ErrorMapper>>,
    default_timeout: Option<Duration>,
    metrics: Option<Arc<RuntimeMetrics>>,
}

/// Layer wrapping a service in the interceptor chain
#[derive(Clone)]
pub struct InterceptorLayer<R> {
    shared: Arc<Shared>,
    responder: R,
}

impl<R> InterceptorLayer<R> {
    /// Layer running `chain` and rendering errors with `responder`
    #[must_use]
    pub fn new(chain: InterceptorChain, responder: R) -> Self {
        Self {
            shared: Arc::new(Shared {
                chain,
                mapper: None,
                default_timeout: None,
                metrics: None,
            }),
            responder,
        }
    }

    fn shared_mut(&mut self) -> Option<&mut Shared> {
        Arc::get_mut(&mut self.shared)
    }

    /// Map call errors with `mapper`
    #[must_use]
    pub fn with_error_mapper(mut self, mapper: Option<Arc<dyn ErrorMapper>>) -> Self {
        if let Some(shared) = self.shared_mut() {
            shared.mapper = mapper;
        }
        self
    }

    /// Deadline for calls that don't carry a shorter one
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        if let Some(shared) = self.shared_mut() {
            shared.default_timeout = Some(timeout);
        }
        self
    }

    /// Record call metrics
    #[must_use]
    pub fn with_metrics(mut self, metrics: Option<Arc<RuntimeMetrics>>) -> Self {
        if let Some(shared) = self.shared_mut() {
            shared.metrics = metrics;
        }
        self
    }
}

impl<S, R: Clone> Layer<S> for InterceptorLayer<R> {
    type Service = InterceptorService<S, R>;

    fn layer(&self, inner: S) -> Self::Service {
        InterceptorService {
            inner,
            shared: Arc::clone(&self.shared),
            responder: self.responder.clone(),
        }
    }
}

/// Service produced by [`InterceptorLayer`]
pub struct InterceptorService<S, R> {
    inner: S,
    shared: Arc<Shared>,
    responder: R,
}

impl<S: Clone, R: Clone> Clone for InterceptorService<S, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            shared: Arc::clone(&self.shared),
            responder: self.responder.clone(),
        }
    }
}

impl<S, R, ReqB, ResB> Service<Request<ReqB>> for InterceptorService<S, R>
where
    S: Service<Request<ReqB>, Response = Response<ResB>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    R: CallResponder<ResB>,
    ReqB: Send + 'static,
    ResB: Send + 'static,
{
    type Response = Response<ResB>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness is driven per call through `oneshot`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<ReqB>) -> Self::Future {
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let shared = Arc::clone(&self.shared);
        let responder = self.responder.clone();

        Box::pin(async move {
            let ctx = CallContext::from_request(&request, shared.default_timeout);
            let error_ctx = ctx.clone();
            let method = ctx.method().to_string();
            let deadline = ctx.deadline();
            let started = Instant::now();
            if let Some(metrics) = &shared.metrics {
                metrics.active_calls.inc();
            }

            let mut forwarded: Option<Result<Response<ResB>, S::Error>> = None;
            let outcome = {
                let forwarded = &mut forwarded;
                let mut request = request;
                let run = shared.chain.run(ctx, move |ctx| async move {
                    request.extensions_mut().insert(ctx);
                    *forwarded = Some(inner.oneshot(request).await);
                    Ok(())
                });
                let guarded = AssertUnwindSafe(run).catch_unwind();
                match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                        .await
                        .unwrap_or(Ok(Err(CallError::DeadlineExceeded))),
                    None => guarded.await,
                }
            };

            let result: CallResult = outcome.unwrap_or_else(|payload| {
                let err = CallError::from_panic(payload.as_ref());
                error!(
                    method = %method,
                    correlation_id = %error_ctx.correlation_id(),
                    error = %err,
                    "Recovered from panic while serving call"
                );
                if let Some(metrics) = &shared.metrics {
                    metrics.record_panic(&method);
                }
                Err(err)
            });

            let (response, code) = match (result, forwarded) {
                (Ok(()), Some(Ok(response))) => {
                    let code = response.status().as_u16().to_string();
                    (Ok(response), code)
                }
                (Ok(()), Some(Err(err))) => (Err(err), "transport_error".to_string()),
                (result, _) => {
                    let err = result.err().unwrap_or_else(|| CallError::Internal {
                        reason: "call was not forwarded".to_string(),
                    });
                    if matches!(err, CallError::DeadlineExceeded) {
                        warn!(
                            method = %method,
                            correlation_id = %error_ctx.correlation_id(),
                            "Call exceeded its deadline"
                        );
                    }
                    let mapped = map_call_error(shared.mapper.as_deref(), &error_ctx, &err);
                    (Ok(responder.respond(&mapped)), mapped.code.as_str().to_string())
                }
            };

            if let Some(metrics) = &shared.metrics {
                metrics.active_calls.dec();
                metrics.record_call(&method, &code, started.elapsed());
            }
            response
        })
    }
}
