//! HTTP servers: admin endpoints and public REST handlers

use super::{ResolvedServerConfig, ServerHandle, serve_with};
use crate::error::ErrorMapper;
use crate::middleware::JsonResponder;
use crate::observability::RuntimeMetrics;
use axum::Router;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use std::sync::Arc;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Server for an axum router.
///
/// Errors raised before the handler runs are returned as JSON bodies.
#[must_use]
pub fn http_server(
    router: Router,
    resolved: ResolvedServerConfig,
    mapper: Option<Arc<dyn ErrorMapper>>,
    metrics: Option<Arc<RuntimeMetrics>>,
) -> ServerHandle {
    serve_with(router, JsonResponder, resolved, mapper, metrics)
}

/// Liveness and metrics endpoints served on the admin listener
pub fn admin_router(metrics: Option<Arc<RuntimeMetrics>>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/metrics",
            get(move || {
                let body = metrics.as_ref().map(|m| m.render()).unwrap_or_default();
                async move { ([(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response() }
            }),
        )
}
