//! Service hooks
//!
//! A [`Hooks`] value bundles the optional strategies a service can plug into
//! the runtime. Every field is optional; an unset field means "use the
//! default". For option lists, the `additional_*` and `override_*` forms of
//! one customization point are mutually exclusive (see [`resolver`]).

pub mod options;
pub mod resolver;

use crate::authrules::ClaimsRuleCompiler;
use crate::config::{GrpcDownstreamConfig, RuntimeConfig, ServerConfig};
use crate::error::ErrorMapper;
use crate::middleware::Interceptor;
use std::fmt;
use std::sync::Arc;
use tracing::Dispatch;

pub use options::{GrpcDialOption, GrpcServerOption, ServerOptions};
pub use resolver::{
    CustomizationPoint, GRPC_DIAL_OPTIONS, GRPC_SERVER_OPTIONS, resolve,
    resolve_grpc_dial_options, resolve_grpc_server_options,
};

/// Produces the logger bound to every call
pub type LoggerHook = Arc<dyn Fn() -> Dispatch + Send + Sync>;

/// Replaces the default dial options of a downstream service
pub type OverrideGrpcDialOptionsHook =
    Arc<dyn Fn(&str, &GrpcDownstreamConfig) -> anyhow::Result<Vec<GrpcDialOption>> + Send + Sync>;

/// Replaces the default options of the public gRPC server
pub type OverrideGrpcServerOptionsHook =
    Arc<dyn Fn(&ServerConfig) -> anyhow::Result<Vec<GrpcServerOption>> + Send + Sync>;

/// Inspects, adjusts or rejects the configuration before anything is resolved
pub type ValidateConfigHook = Arc<dyn Fn(&mut RuntimeConfig) -> anyhow::Result<()> + Send + Sync>;

/// Optional strategies supplied by the service.
#[derive(Clone, Default)]
pub struct Hooks {
    /// Logger for calls; the process-wide subscriber when unset
    pub logger: Option<LoggerHook>,
    /// Maps call errors to responses
    pub map_error: Option<Arc<dyn ErrorMapper>>,
    /// Appended to the default dial options
    pub additional_grpc_dial_options: Vec<GrpcDialOption>,
    /// Replaces the default dial options
    pub override_grpc_dial_options: Option<OverrideGrpcDialOptionsHook>,
    /// Appended to the default server options
    pub additional_grpc_server_options: Vec<GrpcServerOption>,
    /// Replaces the default server options
    pub override_grpc_server_options: Option<OverrideGrpcServerOptionsHook>,
    /// Compiles rule expressions instead of the built-in compiler
    pub override_make_jwt_claims_based_authorization_rule: Option<Arc<dyn ClaimsRuleCompiler>>,
    /// Interceptors for public listeners, in registration order
    pub additional_interceptors: Vec<Arc<dyn Interceptor>>,
    /// Interceptors for the admin listener, in registration order
    pub additional_admin_interceptors: Vec<Arc<dyn Interceptor>>,
    /// Runs on the configuration before resolution
    pub validate_config: Option<ValidateConfigHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("logger", &self.logger.is_some())
            .field("map_error", &self.map_error.is_some())
            .field("additional_grpc_dial_options", &self.additional_grpc_dial_options)
            .field("override_grpc_dial_options", &self.override_grpc_dial_options.is_some())
            .field("additional_grpc_server_options", &self.additional_grpc_server_options)
            .field("override_grpc_server_options", &self.override_grpc_server_options.is_some())
            .field(
                "override_make_jwt_claims_based_authorization_rule",
                &self.override_make_jwt_claims_based_authorization_rule.is_some(),
            )
            .field(
                "additional_interceptors",
                &self.additional_interceptors.iter().map(|i| i.name()).collect::<Vec<_>>(),
            )
            .field(
                "additional_admin_interceptors",
                &self.additional_admin_interceptors.iter().map(|i| i.name()).collect::<Vec<_>>(),
            )
            .field("validate_config", &self.validate_config.is_some())
            .finish()
    }
}

impl Hooks {
    /// Set the logger hook
    #[must_use]
    pub fn with_logger<F>(mut self, logger: F) -> Self
    where
        F: Fn() -> Dispatch + Send + Sync + 'static,
    {
        self.logger = Some(Arc::new(logger));
        self
    }

    /// Set the error mapper
    #[must_use]
    pub fn with_error_mapper(mut self, mapper: impl ErrorMapper + 'static) -> Self {
        self.map_error = Some(Arc::new(mapper));
        self
    }

    /// Append dial options to the defaults
    #[must_use]
    pub fn with_additional_grpc_dial_options(mut self, options: Vec<GrpcDialOption>) -> Self {
        self.additional_grpc_dial_options.extend(options);
        self
    }

    /// Replace the default dial options
    #[must_use]
    pub fn with_override_grpc_dial_options<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &GrpcDownstreamConfig) -> anyhow::Result<Vec<GrpcDialOption>>
            + Send
            + Sync
            + 'static,
    {
        self.override_grpc_dial_options = Some(Arc::new(hook));
        self
    }

    /// Append server options to the defaults
    #[must_use]
    pub fn with_additional_grpc_server_options(mut self, options: Vec<GrpcServerOption>) -> Self {
        self.additional_grpc_server_options.extend(options);
        self
    }

    /// Replace the default server options
    #[must_use]
    pub fn with_override_grpc_server_options<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ServerConfig) -> anyhow::Result<Vec<GrpcServerOption>> + Send + Sync + 'static,
    {
        self.override_grpc_server_options = Some(Arc::new(hook));
        self
    }

    /// Compile rule expressions with `compiler`
    #[must_use]
    pub fn with_claims_rule_compiler(mut self, compiler: impl ClaimsRuleCompiler + 'static) -> Self {
        self.override_make_jwt_claims_based_authorization_rule = Some(Arc::new(compiler));
        self
    }

    /// Register an interceptor for public listeners
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.additional_interceptors.push(Arc::new(interceptor));
        self
    }

    /// Register an interceptor for the admin listener
    #[must_use]
    pub fn with_admin_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.additional_admin_interceptors.push(Arc::new(interceptor));
        self
    }

    /// Set the configuration validation hook
    #[must_use]
    pub fn with_validate_config<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RuntimeConfig) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.validate_config = Some(Arc::new(hook));
        self
    }

    /// The logger for calls: the hook's, or the current default subscriber
    #[must_use]
    pub fn resolve_logger(&self) -> Dispatch {
        self.logger.as_ref().map_or_else(
            || tracing::dispatcher::get_default(Clone::clone),
            |logger| logger(),
        )
    }
}
