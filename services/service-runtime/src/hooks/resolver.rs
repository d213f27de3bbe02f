//! Additive vs. override resolution of customization points

use super::Hooks;
use super::options::{
    GrpcDialOption, GrpcServerOption, default_grpc_dial_options, default_grpc_server_options,
};
use crate::config::{GrpcDownstreamConfig, ServerConfig};
use crate::error::RuntimeError;
use std::time::Duration;
use tracing::debug;

/// A hook field pair where the caller may either extend or replace the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomizationPoint {
    /// Name of the additive field
    pub additive: &'static str,
    /// Name of the override field
    pub override_: &'static str,
}

/// gRPC client dial options
pub const GRPC_DIAL_OPTIONS: CustomizationPoint = CustomizationPoint {
    additive: "AdditionalGrpcDialOptions",
    override_: "OverrideGrpcDialOptions",
};

/// gRPC server options
pub const GRPC_SERVER_OPTIONS: CustomizationPoint = CustomizationPoint {
    additive: "AdditionalGrpcServerOptions",
    override_: "OverrideGrpcServerOptions",
};

impl CustomizationPoint {
    /// Error reported when both fields are set
    #[must_use]
    pub const fn conflict(&self) -> RuntimeError {
        RuntimeError::ConfigurationConflict {
            additive: self.additive,
            override_: self.override_,
        }
    }
}

/// Resolve one customization point.
///
/// - additive options and an override together are a conflict, and neither
///   the override nor the defaults are invoked
/// - an override alone produces exactly what it returns
/// - otherwise the defaults come first, followed by the additive options
///
/// # Errors
///
/// Returns [`RuntimeError::ConfigurationConflict`] on a conflict, or whatever
/// the override or defaults factory returns.
pub fn resolve<T, O, D>(
    point: &CustomizationPoint,
    additive: &[T],
    override_fn: Option<O>,
    defaults: D,
) -> Result<Vec<T>, RuntimeError>
where
    T: Clone,
    O: FnOnce() -> Result<Vec<T>, RuntimeError>,
    D: FnOnce() -> Result<Vec<T>, RuntimeError>,
{
    match override_fn {
        Some(_) if !additive.is_empty() => Err(point.conflict()),
        Some(override_fn) => override_fn(),
        None => {
            let mut options = defaults()?;
            options.extend_from_slice(additive);
            Ok(options)
        }
    }
}

/// Resolve the dial options for a downstream gRPC service.
///
/// # Errors
///
/// See [`resolve`].
pub fn resolve_grpc_dial_options(
    service_name: &str,
    hooks: &Hooks,
    downstream: &GrpcDownstreamConfig,
) -> Result<Vec<GrpcDialOption>, RuntimeError> {
    let override_fn = hooks.override_grpc_dial_options.as_ref().map(|hook| {
        move || hook(service_name, downstream).map_err(RuntimeError::Internal)
    });
    let options = resolve(
        &GRPC_DIAL_OPTIONS,
        &hooks.additional_grpc_dial_options,
        override_fn,
        || default_grpc_dial_options(downstream),
    )?;
    debug!(
        service = service_name,
        options = ?options.iter().map(GrpcDialOption::name).collect::<Vec<_>>(),
        "Resolved gRPC dial options"
    );
    Ok(options)
}

/// Resolve the options of a gRPC server.
///
/// # Errors
///
/// See [`resolve`].
pub fn resolve_grpc_server_options(
    hooks: &Hooks,
    server: &ServerConfig,
    context_timeout: Duration,
) -> Result<Vec<GrpcServerOption>, RuntimeError> {
    let override_fn = hooks
        .override_grpc_server_options
        .as_ref()
        .map(|hook| move || hook(server).map_err(RuntimeError::Internal));
    let options = resolve(
        &GRPC_SERVER_OPTIONS,
        &hooks.additional_grpc_server_options,
        override_fn,
        || default_grpc_server_options(server, context_timeout),
    )?;
    debug!(
        address = %server.address(),
        options = ?options.iter().map(GrpcServerOption::name).collect::<Vec<_>>(),
        "Resolved gRPC server options"
    );
    Ok(options)
}
