//! Downstream gRPC channels

use crate::config::GrpcDownstreamConfig;
use crate::error::RuntimeError;
use crate::hooks::{Hooks, resolve_grpc_dial_options};
use tonic::transport::{Channel, Endpoint};
use tracing::info;

/// Open a lazily connected channel to `service_name`.
///
/// Dial options are resolved from the defaults for `downstream` and the
/// dial option hooks. No connection is made until the first request.
///
/// # Errors
///
/// Returns [`RuntimeError::InvalidOption`] for a malformed address or an
/// option `tonic` rejects, or a resolution error from the hooks.
pub fn dial(
    service_name: &str,
    hooks: &Hooks,
    downstream: &GrpcDownstreamConfig,
) -> Result<Channel, RuntimeError> {
    let mut endpoint = Endpoint::from_shared(downstream.service_address.clone()).map_err(|e| {
        RuntimeError::InvalidOption {
            option: "service_address",
            reason: format!("{}: {e}", downstream.service_address),
        }
    })?;
    for option in resolve_grpc_dial_options(service_name, hooks, downstream)? {
        endpoint = option.apply(endpoint)?;
    }
    info!(
        service = service_name,
        address = %downstream.service_address,
        "Dialing downstream service"
    );
    Ok(endpoint.connect_lazy())
}
