//! Servers
//!
//! Every transport, public gRPC, public REST or admin HTTP, is served by a
//! [`ServerHandle`] built from a Tower service. The handle owns the socket
//! and the start/stop state machine; the service stack carries the
//! interceptor chain, the concurrency limit and the error rendering of the
//! transport.

pub mod admin;
pub mod grpc;
pub mod listener;
pub mod state;
pub mod tls;

pub use admin::{admin_router, http_server};
pub use grpc::grpc_server;
pub use listener::ServerHandle;
pub use state::ServerState;

use crate::config::ServerConfig;
use crate::error::{ErrorMapper, RuntimeError};
use crate::hooks::{GrpcServerOption, Hooks, ServerOptions, resolve_grpc_server_options};
use crate::hooks::options::default_grpc_server_options;
use crate::middleware::{CallResponder, InterceptorChain, InterceptorLayer};
use crate::observability::RuntimeMetrics;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::Incoming;
use std::sync::Arc;
use std::time::Duration;
use tower::limit::ConcurrencyLimitLayer;
use tower::util::BoxCloneService;
use tower::{Service, ServiceBuilder};

/// Error type of served services
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Response body of served services
pub type ResponseBody = UnsyncBoxBody<Bytes, BoxError>;

/// A fully assembled service, ready for a listener
pub type HttpService = BoxCloneService<Request<Incoming>, Response<ResponseBody>, BoxError>;

/// Anything with a start/graceful-stop/stop lifecycle.
#[async_trait]
pub trait StoppableServer: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Current lifecycle state
    fn state(&self) -> ServerState;

    /// Bind and serve until stopped.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::ListenerBindFailure`] if the address cannot be
    /// bound, leaving the server in `Created`, or
    /// [`RuntimeError::InvalidState`] if the server already started.
    async fn start(&self) -> Result<(), RuntimeError>;

    /// Stop accepting connections and wait for in-flight calls to finish
    async fn graceful_stop(&self);

    /// Close every connection without waiting
    async fn stop(&self);
}

/// Listener settings after merging defaults with hooks.
#[derive(Debug, Clone)]
pub struct ResolvedServerConfig {
    /// Server name
    pub name: String,
    /// `host:port` to bind
    pub address: String,
    /// Final option list, in resolution order
    pub options: Vec<GrpcServerOption>,
    /// Folded options
    pub settings: ServerOptions,
    /// Interceptors run around every call
    pub interceptors: InterceptorChain,
}

impl ResolvedServerConfig {
    /// Resolve a gRPC listener, honouring the server option hooks.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::ConfigurationConflict`] if both forms of the
    /// server option hook are set, or the error of the option factory.
    pub fn grpc(
        name: impl Into<String>,
        server: &ServerConfig,
        hooks: &Hooks,
        interceptors: InterceptorChain,
        context_timeout: Duration,
    ) -> Result<Self, RuntimeError> {
        let options = resolve_grpc_server_options(hooks, server, context_timeout)?;
        Ok(Self::from_options(name, server, options, interceptors))
    }

    /// Resolve an HTTP listener from its configuration alone.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Tls`] if the TLS material cannot be loaded.
    pub fn http(
        name: impl Into<String>,
        server: &ServerConfig,
        interceptors: InterceptorChain,
        context_timeout: Duration,
    ) -> Result<Self, RuntimeError> {
        let options = default_grpc_server_options(server, context_timeout)?;
        Ok(Self::from_options(name, server, options, interceptors))
    }

    fn from_options(
        name: impl Into<String>,
        server: &ServerConfig,
        options: Vec<GrpcServerOption>,
        interceptors: InterceptorChain,
    ) -> Self {
        Self {
            name: name.into(),
            address: server.address(),
            settings: ServerOptions::from_options(&options),
            options,
            interceptors,
        }
    }
}

/// Wrap `inner` in the call boundary and the concurrency limit, and hand it
/// to a new [`ServerHandle`].
pub fn serve_with<S, B, R>(
    inner: S,
    responder: R,
    resolved: ResolvedServerConfig,
    mapper: Option<Arc<dyn ErrorMapper>>,
    metrics: Option<Arc<RuntimeMetrics>>,
) -> ServerHandle
where
    S: Service<Request<Incoming>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send + 'static,
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
    R: CallResponder<B>,
{
    let mut boundary = InterceptorLayer::new(resolved.interceptors.clone(), responder)
        .with_error_mapper(mapper)
        .with_metrics(metrics);
    if let Some(timeout) = resolved.settings.request_timeout {
        boundary = boundary.with_default_timeout(timeout);
    }

    let service = ServiceBuilder::new()
        .option_layer(resolved.settings.concurrency_limit.map(ConcurrencyLimitLayer::new))
        .map_response(|response: Response<B>| {
            response.map(|body| body.map_err(|e| -> BoxError { e.into() }).boxed_unsync())
        })
        .map_err(|e: S::Error| -> BoxError { e.into() })
        .layer(boundary)
        .service(inner);

    ServerHandle::new(
        resolved.name,
        resolved.address,
        resolved.settings,
        BoxCloneService::new(service),
    )
}
