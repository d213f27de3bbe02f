//! Service runtime
//!
//! Entry point for generated services. A [`ServiceRuntime`] is built once
//! from configuration and hooks; it resolves authorization rules, builds the
//! listeners with their interceptor chains, dials downstream services and
//! runs everything until shutdown.

use crate::authrules::{Endpoint, EndpointRules, resolve_endpoint_rules};
use crate::config::{RuntimeConfig, ServerConfig};
use crate::dispatch::Dispatcher;
use crate::downstream::dial;
use crate::error::RuntimeError;
use crate::hooks::{GRPC_DIAL_OPTIONS, GRPC_SERVER_OPTIONS, Hooks};
use crate::jwt::{AuthenticatorRegistry, HttpConfig, build_http_client};
use crate::middleware::{InterceptorChain, LoggerInterceptor, TraceIdInterceptor, compose};
use crate::observability::RuntimeMetrics;
use crate::server::{
    ResolvedServerConfig, ServerHandle, StoppableServer, admin_router, grpc_server, http_server,
};
use crate::shutdown::Supervisor;
use axum::Router;
use prometheus::Registry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tonic::service::Routes;
use tonic::transport::Channel;
use tracing::Dispatch;

/// Configured runtime of one service.
pub struct ServiceRuntime {
    config: RuntimeConfig,
    hooks: Hooks,
    logger: Dispatch,
    metrics: Arc<RuntimeMetrics>,
    authenticators: Arc<AuthenticatorRegistry>,
}

impl std::fmt::Debug for ServiceRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRuntime")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl ServiceRuntime {
    /// Build the runtime.
    ///
    /// Runs the config validation hook, validates the configuration and
    /// rejects conflicting hooks. Nothing here touches the network.
    ///
    /// # Errors
    ///
    /// The validation hook's error, a [`RuntimeError::Config`] or a
    /// [`RuntimeError::ConfigurationConflict`].
    pub fn new(mut config: RuntimeConfig, hooks: Hooks) -> Result<Self, RuntimeError> {
        if let Some(validate) = &hooks.validate_config {
            validate(&mut config)?;
        }
        config.validate()?;

        if !hooks.additional_grpc_server_options.is_empty()
            && hooks.override_grpc_server_options.is_some()
        {
            return Err(GRPC_SERVER_OPTIONS.conflict());
        }
        if !hooks.additional_grpc_dial_options.is_empty()
            && hooks.override_grpc_dial_options.is_some()
        {
            return Err(GRPC_DIAL_OPTIONS.conflict());
        }

        let metrics = Arc::new(RuntimeMetrics::new(Registry::new())?);
        let http_client = build_http_client(&HttpConfig::default()).map_err(anyhow::Error::from)?;
        let authenticators = Arc::new(AuthenticatorRegistry::new(
            http_client,
            Some(Arc::clone(&metrics)),
        ));
        let logger = hooks.resolve_logger();

        Ok(Self {
            config,
            hooks,
            logger,
            metrics,
            authenticators,
        })
    }

    /// Validated configuration
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Hooks in effect
    #[must_use]
    pub const fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Runtime metrics
    #[must_use]
    pub const fn metrics(&self) -> &Arc<RuntimeMetrics> {
        &self.metrics
    }

    /// Shared authenticators
    #[must_use]
    pub const fn authenticators(&self) -> &Arc<AuthenticatorRegistry> {
        &self.authenticators
    }

    /// Deadline of calls that carry none
    #[must_use]
    pub const fn context_timeout(&self) -> Duration {
        self.config.gen_code.upstream.context_timeout()
    }

    /// Interceptors of the public listeners
    #[must_use]
    pub fn interceptors(&self) -> InterceptorChain {
        self.chain(&self.hooks.additional_interceptors)
    }

    /// Interceptors of the admin listener
    #[must_use]
    pub fn admin_interceptors(&self) -> InterceptorChain {
        self.chain(&self.hooks.additional_admin_interceptors)
    }

    fn chain(&self, user: &[Arc<dyn crate::middleware::Interceptor>]) -> InterceptorChain {
        compose(
            Arc::new(LoggerInterceptor::new(self.logger.clone())),
            user,
            Arc::new(TraceIdInterceptor),
        )
    }

    /// Resolve the rules of `endpoints`. Key sets are fetched here, once per
    /// distinct authentication configuration.
    ///
    /// # Errors
    ///
    /// See [`resolve_endpoint_rules`].
    pub async fn resolve_rules(&self, endpoints: &[Endpoint]) -> Result<EndpointRules, RuntimeError> {
        let rules =
            resolve_endpoint_rules(endpoints, &self.hooks, &self.config, &self.authenticators)
                .await?;
        Ok(rules.with_metrics(Arc::clone(&self.metrics)))
    }

    /// Dispatcher enforcing `rules`
    #[must_use]
    pub fn dispatcher(&self, rules: EndpointRules) -> Dispatcher {
        Dispatcher::new(Arc::new(rules))
            .with_error_mapper(self.hooks.map_error.clone())
            .with_default_timeout(self.context_timeout())
    }

    fn listener_config<'a>(
        server: Option<&'a ServerConfig>,
        section: &str,
    ) -> Result<&'a ServerConfig, RuntimeError> {
        server.ok_or_else(|| RuntimeError::MissingSection {
            section: section.to_string(),
        })
    }

    /// Public gRPC server for `routes`, on `gen_code.upstream.grpc`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::MissingSection`], or a server option resolution error.
    pub fn grpc_server(&self, routes: Routes) -> Result<ServerHandle, RuntimeError> {
        let server =
            Self::listener_config(self.config.gen_code.upstream.grpc.as_ref(), "gen_code.upstream.grpc")?;
        let resolved = ResolvedServerConfig::grpc(
            "grpc",
            server,
            &self.hooks,
            self.interceptors(),
            self.context_timeout(),
        )?;
        Ok(grpc_server(
            routes,
            resolved,
            self.hooks.map_error.clone(),
            Some(Arc::clone(&self.metrics)),
        ))
    }

    /// Public REST server for `router`, on `gen_code.upstream.http`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::MissingSection`] or [`RuntimeError::Tls`].
    pub fn http_server(&self, router: Router) -> Result<ServerHandle, RuntimeError> {
        let server =
            Self::listener_config(self.config.gen_code.upstream.http.as_ref(), "gen_code.upstream.http")?;
        let resolved =
            ResolvedServerConfig::http("http", server, self.interceptors(), self.context_timeout())?;
        Ok(http_server(
            router,
            resolved,
            self.hooks.map_error.clone(),
            Some(Arc::clone(&self.metrics)),
        ))
    }

    /// Admin server on `gen_code.admin`: `/healthz`, `/metrics` and the
    /// routes of `router`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::MissingSection`] or [`RuntimeError::Tls`].
    pub fn admin_server(&self, router: Router) -> Result<ServerHandle, RuntimeError> {
        let server = Self::listener_config(self.config.gen_code.admin.as_ref(), "gen_code.admin")?;
        let resolved = ResolvedServerConfig::http(
            "admin",
            server,
            self.admin_interceptors(),
            self.context_timeout(),
        )?;
        Ok(http_server(
            admin_router(Some(Arc::clone(&self.metrics))).merge(router),
            resolved,
            self.hooks.map_error.clone(),
            None,
        ))
    }

    /// Channel to the downstream service configured under `service_name`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::MissingSection`], or see [`dial`].
    pub fn dial(&self, service_name: &str) -> Result<Channel, RuntimeError> {
        let downstream = self.config.gen_code.downstream.get(service_name).ok_or_else(|| {
            RuntimeError::MissingSection {
                section: format!("gen_code.downstream.{service_name}"),
            }
        })?;
        dial(service_name, &self.hooks, downstream)
    }

    /// Serve `servers` until `signal` completes or one of them fails, then
    /// stop them and release the authenticators.
    ///
    /// # Errors
    ///
    /// The first server error.
    pub async fn serve<F>(
        &self,
        servers: Vec<Arc<dyn StoppableServer>>,
        signal: F,
    ) -> Result<(), RuntimeError>
    where
        F: Future<Output = ()> + Send,
    {
        let supervisor = servers.into_iter().fold(
            Supervisor::new(Duration::from_secs(self.config.library.shutdown_timeout_seconds)),
            Supervisor::with_server,
        );
        let result = supervisor.run(signal).await;
        // Listeners are closed before the authenticators go away.
        self.authenticators.shutdown().await;
        result
    }
}
