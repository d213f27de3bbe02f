//! Service Runtime - demo entry point
//!
//! Serves the standard gRPC health service on the public gRPC listener and
//! the admin endpoints plus `/status` on the admin listener, with graceful shutdown on
//! SIGINT/SIGTERM. The configuration file path is the first argument.

use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tonic_health::ServingStatus;
use tracing::{info, warn};

use service_runtime::hooks::Hooks;
use service_runtime::observability::init_logging;
use service_runtime::server::StoppableServer;
use service_runtime::server::grpc::health_routes;
use service_runtime::shutdown::wait_for_signal;
use service_runtime::{RuntimeConfig, ServiceRuntime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = RuntimeConfig::load(config_path.as_deref())?;
    init_logging(&config.library.log)?;

    info!("Starting service runtime");
    let runtime = ServiceRuntime::new(config, Hooks::default())?;

    let (mut reporter, routes) = health_routes();
    let mut servers: Vec<Arc<dyn StoppableServer>> = Vec::new();
    if runtime.config().gen_code.upstream.grpc.is_some() {
        servers.push(Arc::new(runtime.grpc_server(routes)?));
    }
    if runtime.config().gen_code.admin.is_some() {
        let admin_routes = Router::new().route("/status", get(status));
        servers.push(Arc::new(runtime.admin_server(admin_routes)?));
    }
    if servers.is_empty() {
        warn!("No listener configured; set gen_code.upstream.grpc or gen_code.admin");
        return Ok(());
    }

    let signal = async move {
        wait_for_signal().await;
        reporter.set_service_status("", ServingStatus::NotServing).await;
    };
    runtime.serve(servers, signal).await?;

    info!("Service runtime stopped");
    Ok(())
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "serving",
    }))
}
