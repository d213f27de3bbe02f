//! Public gRPC server

use super::{ResolvedServerConfig, ServerHandle, serve_with};
use crate::error::ErrorMapper;
use crate::middleware::GrpcResponder;
use crate::observability::RuntimeMetrics;
use http::Request;
use hyper::body::Incoming;
use std::sync::Arc;
use tonic::service::Routes;
use tonic_health::server::{HealthReporter, health_reporter};
use tower::ServiceBuilder;

/// Server for generated tonic services.
///
/// Errors raised before the handler runs (deadline, panic, a rejecting
/// interceptor) are returned as trailers-only gRPC responses. Request bodies
/// are boxed into the body type tonic routes on.
#[must_use]
pub fn grpc_server(
    routes: Routes,
    resolved: ResolvedServerConfig,
    mapper: Option<Arc<dyn ErrorMapper>>,
    metrics: Option<Arc<RuntimeMetrics>>,
) -> ServerHandle {
    let routes = ServiceBuilder::new()
        .map_request(|request: Request<Incoming>| request.map(tonic::body::boxed))
        .service(routes);
    serve_with(routes, GrpcResponder, resolved, mapper, metrics)
}

/// Routes holding only the standard health service, plus its reporter
#[must_use]
pub fn health_routes() -> (HealthReporter, Routes) {
    let (reporter, service) = health_reporter();
    (reporter, Routes::new(service))
}
