//! gRPC server and dial options
//!
//! Options are plain values so hooks can add to or replace the defaults
//! without touching transport types. Server options are folded into a
//! [`ServerOptions`] (last one wins); dial options are applied to a
//! `tonic` endpoint in order.

use crate::config::{GrpcDownstreamConfig, ServerConfig};
use crate::error::RuntimeError;
use crate::server::tls::load_server_tls;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::{Certificate, ClientTlsConfig, Endpoint};

/// One gRPC server option.
#[derive(Debug, Clone)]
pub enum GrpcServerOption {
    /// Deadline for calls without a `grpc-timeout` header
    RequestTimeout(Duration),
    /// In-flight calls across all connections
    ConcurrencyLimit(usize),
    /// HTTP/2 streams per connection
    MaxConcurrentStreams(u32),
    /// HTTP/2 keepalive ping interval
    Http2KeepaliveInterval(Duration),
    /// HTTP/2 keepalive ping timeout
    Http2KeepaliveTimeout(Duration),
    /// HTTP/2 maximum frame size
    MaxFrameSize(u32),
    /// Serve TLS
    Tls(Arc<rustls::ServerConfig>),
}

impl GrpcServerOption {
    /// Option name, used in logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RequestTimeout(_) => "request_timeout",
            Self::ConcurrencyLimit(_) => "concurrency_limit",
            Self::MaxConcurrentStreams(_) => "max_concurrent_streams",
            Self::Http2KeepaliveInterval(_) => "http2_keepalive_interval",
            Self::Http2KeepaliveTimeout(_) => "http2_keepalive_timeout",
            Self::MaxFrameSize(_) => "max_frame_size",
            Self::Tls(_) => "tls",
        }
    }
}

/// Server options after folding, ready for a listener.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Deadline for calls without a `grpc-timeout` header
    pub request_timeout: Option<Duration>,
    /// In-flight calls across all connections
    pub concurrency_limit: Option<usize>,
    /// HTTP/2 streams per connection
    pub max_concurrent_streams: Option<u32>,
    /// HTTP/2 keepalive ping interval
    pub http2_keepalive_interval: Option<Duration>,
    /// HTTP/2 keepalive ping timeout
    pub http2_keepalive_timeout: Option<Duration>,
    /// HTTP/2 maximum frame size
    pub max_frame_size: Option<u32>,
    /// TLS configuration; plaintext when absent
    pub tls: Option<Arc<rustls::ServerConfig>>,
}

impl ServerOptions {
    /// Fold an ordered option list, later options overriding earlier ones
    #[must_use]
    pub fn from_options(options: &[GrpcServerOption]) -> Self {
        options.iter().fold(Self::default(), |mut folded, option| {
            match option {
                GrpcServerOption::RequestTimeout(d) => folded.request_timeout = Some(*d),
                GrpcServerOption::ConcurrencyLimit(n) => folded.concurrency_limit = Some(*n),
                GrpcServerOption::MaxConcurrentStreams(n) => {
                    folded.max_concurrent_streams = Some(*n);
                }
                GrpcServerOption::Http2KeepaliveInterval(d) => {
                    folded.http2_keepalive_interval = Some(*d);
                }
                GrpcServerOption::Http2KeepaliveTimeout(d) => {
                    folded.http2_keepalive_timeout = Some(*d);
                }
                GrpcServerOption::MaxFrameSize(n) => folded.max_frame_size = Some(*n),
                GrpcServerOption::Tls(tls) => folded.tls = Some(Arc::clone(tls)),
            }
            folded
        })
    }
}

/// Default server options derived from a listener configuration.
///
/// # Errors
///
/// Returns [`RuntimeError::Tls`] if the configured certificate or key cannot be loaded.
pub fn default_grpc_server_options(
    server: &ServerConfig,
    context_timeout: Duration,
) -> Result<Vec<GrpcServerOption>, RuntimeError> {
    let mut options = vec![GrpcServerOption::RequestTimeout(context_timeout)];
    if let Some(tls) = &server.tls {
        options.push(GrpcServerOption::Tls(load_server_tls(tls)?));
    }
    if let Some(ms) = server.http2_keepalive_interval_ms {
        options.push(GrpcServerOption::Http2KeepaliveInterval(Duration::from_millis(ms)));
    }
    if let Some(ms) = server.http2_keepalive_timeout_ms {
        options.push(GrpcServerOption::Http2KeepaliveTimeout(Duration::from_millis(ms)));
    }
    if let Some(n) = server.max_concurrent_streams {
        options.push(GrpcServerOption::MaxConcurrentStreams(n));
    }
    if let Some(n) = server.concurrency_limit {
        options.push(GrpcServerOption::ConcurrencyLimit(n));
    }
    Ok(options)
}

/// One gRPC dial option.
#[derive(Debug, Clone)]
pub enum GrpcDialOption {
    /// Connection establishment timeout
    ConnectTimeout(Duration),
    /// Per-request timeout
    Timeout(Duration),
    /// TCP keepalive
    TcpKeepalive(Duration),
    /// Disable Nagle's algorithm
    TcpNodelay(bool),
    /// In-flight requests on the channel
    ConcurrencyLimit(usize),
    /// User agent header
    UserAgent(String),
    /// HTTP/2 keepalive ping interval
    Http2KeepaliveInterval(Duration),
    /// HTTP/2 keepalive ping timeout
    KeepaliveTimeout(Duration),
    /// Connect with TLS
    Tls(ClientTlsConfig),
}

impl GrpcDialOption {
    /// Option name, used in logs and errors
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ConnectTimeout(_) => "connect_timeout",
            Self::Timeout(_) => "timeout",
            Self::TcpKeepalive(_) => "tcp_keepalive",
            Self::TcpNodelay(_) => "tcp_nodelay",
            Self::ConcurrencyLimit(_) => "concurrency_limit",
            Self::UserAgent(_) => "user_agent",
            Self::Http2KeepaliveInterval(_) => "http2_keepalive_interval",
            Self::KeepaliveTimeout(_) => "keepalive_timeout",
            Self::Tls(_) => "tls",
        }
    }

    /// Apply this option to an endpoint
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidOption`] if `tonic` rejects the value.
    pub fn apply(self, endpoint: Endpoint) -> Result<Endpoint, RuntimeError> {
        let name = self.name();
        let invalid = |e: tonic::transport::Error| RuntimeError::InvalidOption {
            option: name,
            reason: e.to_string(),
        };
        Ok(match self {
            Self::ConnectTimeout(d) => endpoint.connect_timeout(d),
            Self::Timeout(d) => endpoint.timeout(d),
            Self::TcpKeepalive(d) => endpoint.tcp_keepalive(Some(d)),
            Self::TcpNodelay(enabled) => endpoint.tcp_nodelay(enabled),
            Self::ConcurrencyLimit(n) => endpoint.concurrency_limit(n),
            Self::UserAgent(agent) => endpoint.user_agent(agent).map_err(invalid)?,
            Self::Http2KeepaliveInterval(d) => endpoint.http2_keep_alive_interval(d),
            Self::KeepaliveTimeout(d) => endpoint.keep_alive_timeout(d),
            Self::Tls(tls) => endpoint.tls_config(tls).map_err(invalid)?,
        })
    }
}

/// Default dial options derived from a downstream configuration.
///
/// # Errors
///
/// Returns [`RuntimeError::Tls`] if the configured CA bundle cannot be read.
pub fn default_grpc_dial_options(
    downstream: &GrpcDownstreamConfig,
) -> Result<Vec<GrpcDialOption>, RuntimeError> {
    let mut options = vec![GrpcDialOption::TcpNodelay(true)];
    if let Some(ms) = downstream.connect_timeout_ms {
        options.push(GrpcDialOption::ConnectTimeout(Duration::from_millis(ms)));
    }
    if let Some(ms) = downstream.client_timeout_ms {
        options.push(GrpcDialOption::Timeout(Duration::from_millis(ms)));
    }
    if let Some(agent) = &downstream.user_agent {
        options.push(GrpcDialOption::UserAgent(agent.clone()));
    }
    if let Some(tls) = &downstream.tls {
        let mut config = ClientTlsConfig::new();
        if let Some(path) = &tls.ca_cert_path {
            let pem = std::fs::read(path).map_err(|e| RuntimeError::Tls {
                reason: format!("cannot read CA bundle {}: {e}", path.display()),
            })?;
            config = config.ca_certificate(Certificate::from_pem(pem));
        }
        if let Some(domain) = &tls.domain_name {
            config = config.domain_name(domain.clone());
        }
        options.push(GrpcDialOption::Tls(config));
    }
    Ok(options)
}
