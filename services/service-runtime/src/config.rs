//! Type-Safe Configuration with Validation
//!
//! The typed [`RuntimeConfig`] is the input to every resolution step. It can
//! be built directly or loaded from an optional YAML file layered with
//! `APP__*` environment variables.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Configuration errors.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid URL format
    #[error("Invalid URL for {field}: {reason}")]
    InvalidUrl {
        /// Dotted path of the field
        field: String,
        /// Parser diagnostic
        reason: String,
    },

    /// Invalid TTL value
    #[error("Invalid TTL for {field}: must be greater than 0")]
    InvalidTtl {
        /// Dotted path of the field
        field: String,
    },

    /// Invalid timeout value
    #[error("Invalid timeout for {field}: must be greater than 0")]
    InvalidTimeout {
        /// Dotted path of the field
        field: String,
    },

    /// An issuer name appears more than once
    #[error("Duplicate issuer: {0}")]
    DuplicateIssuer(String),

    /// Missing required field
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// Environment variable parse error
    #[error("Failed to parse environment variable {name}: {reason}")]
    ParseError {
        /// Variable name
        name: String,
        /// Parser diagnostic
        reason: String,
    },

    /// The configuration sources could not be read or deserialized
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Root configuration of a service runtime.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Library-level settings
    pub library: LibraryConfig,
    /// Development switches, never set in production
    pub development: Option<DevelopmentConfig>,
    /// Settings consumed by generated code
    pub gen_code: GenCodeConfig,
}

/// Library-level settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Logging settings
    pub log: LogConfig,
    /// Authentication settings
    pub authentication: Option<AuthenticationConfig>,
    /// How long listeners may drain before they are stopped forcefully
    pub shutdown_timeout_seconds: u64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            authentication: None,
            shutdown_timeout_seconds: 30,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Authentication settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthenticationConfig {
    /// JWT authentication; required by every claims-based rule
    pub jwtauth: Option<JwtAuthConfig>,
}

/// JWT authentication settings.
///
/// Two endpoints share an authenticator exactly when their configurations
/// compare equal, hence `Hash` and `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct JwtAuthConfig {
    /// Trusted issuers
    pub issuers: Vec<IssuerConfig>,
    /// Request headers searched for a bearer token, in order
    #[serde(default = "default_token_headers")]
    pub headers: Vec<String>,
    /// Clock skew tolerated for `exp` and `nbf`
    #[serde(default = "default_leeway_seconds")]
    pub leeway_seconds: u64,
}

impl JwtAuthConfig {
    /// Configuration trusting a single issuer
    #[must_use]
    pub fn single_issuer(name: impl Into<String>, jwks_url: Url) -> Self {
        Self {
            issuers: vec![IssuerConfig::new(name, jwks_url)],
            headers: default_token_headers(),
            leeway_seconds: default_leeway_seconds(),
        }
    }

    /// Leeway as a duration
    #[must_use]
    pub const fn leeway(&self) -> Duration {
        Duration::from_secs(self.leeway_seconds)
    }
}

/// One trusted token issuer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct IssuerConfig {
    /// Expected `iss` claim
    pub name: String,
    /// Location of the issuer's key set
    pub jwks_url: Url,
    /// How long a fetched key set is trusted
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    /// Interval of the background refresh, 0 disables it
    #[serde(default = "default_cache_refresh_seconds")]
    pub cache_refresh_seconds: u64,
}

impl IssuerConfig {
    /// Issuer with default cache settings
    #[must_use]
    pub fn new(name: impl Into<String>, jwks_url: Url) -> Self {
        Self {
            name: name.into(),
            jwks_url,
            cache_ttl_seconds: default_cache_ttl_seconds(),
            cache_refresh_seconds: default_cache_refresh_seconds(),
        }
    }

    /// Set the background refresh interval
    #[must_use]
    pub const fn with_refresh_seconds(mut self, seconds: u64) -> Self {
        self.cache_refresh_seconds = seconds;
        self
    }

    /// Set the cache TTL
    #[must_use]
    pub const fn with_ttl_seconds(mut self, seconds: u64) -> Self {
        self.cache_ttl_seconds = seconds;
        self
    }
}

/// Development switches.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DevelopmentConfig {
    /// Replace every authorization rule with "always allow"
    pub disable_all_authorization_rules: bool,
}

/// Settings consumed by generated code.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GenCodeConfig {
    /// Public listeners
    pub upstream: UpstreamConfig,
    /// Admin listener
    pub admin: Option<ServerConfig>,
    /// Downstream gRPC services by name
    pub downstream: HashMap<String, GrpcDownstreamConfig>,
}

/// Public listeners.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Deadline applied to calls that carry none
    pub context_timeout_ms: u64,
    /// gRPC listener
    pub grpc: Option<ServerConfig>,
    /// REST listener
    pub http: Option<ServerConfig>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            context_timeout_ms: 30_000,
            grpc: None,
            http: None,
        }
    }
}

impl UpstreamConfig {
    /// Context timeout as a duration
    #[must_use]
    pub const fn context_timeout(&self) -> Duration {
        Duration::from_millis(self.context_timeout_ms)
    }
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_host_name")]
    pub host_name: String,
    /// Port to bind, 0 picks an ephemeral port
    pub port: u16,
    /// TLS material; plaintext when absent
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// HTTP/2 keepalive ping interval
    #[serde(default)]
    pub http2_keepalive_interval_ms: Option<u64>,
    /// HTTP/2 keepalive ping timeout
    #[serde(default)]
    pub http2_keepalive_timeout_ms: Option<u64>,
    /// HTTP/2 concurrent stream limit per connection
    #[serde(default)]
    pub max_concurrent_streams: Option<u32>,
    /// Concurrent in-flight calls across all connections
    #[serde(default)]
    pub concurrency_limit: Option<usize>,
}

impl ServerConfig {
    /// Plaintext listener on `host_name:port`
    #[must_use]
    pub fn new(host_name: impl Into<String>, port: u16) -> Self {
        Self {
            host_name: host_name.into(),
            port,
            tls: None,
            http2_keepalive_interval_ms: None,
            http2_keepalive_timeout_ms: None,
            max_concurrent_streams: None,
            concurrency_limit: None,
        }
    }

    /// Serve TLS with the given certificate chain and key
    #[must_use]
    pub fn with_tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsConfig {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        });
        self
    }

    /// Limit concurrent in-flight calls
    #[must_use]
    pub const fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    /// `host_name:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host_name, self.port)
    }
}

/// Server TLS material.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain
    pub cert_path: PathBuf,
    /// PEM private key
    pub key_path: PathBuf,
}

/// Downstream gRPC service.
#[derive(Debug, Clone, Deserialize)]
pub struct GrpcDownstreamConfig {
    /// URI of the service, e.g. `http://orders:50051`
    pub service_address: String,
    /// Per-request timeout
    #[serde(default)]
    pub client_timeout_ms: Option<u64>,
    /// Connection establishment timeout
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    /// TLS settings; plaintext when absent
    #[serde(default)]
    pub tls: Option<ClientTlsConfig>,
    /// User agent sent with every request
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl GrpcDownstreamConfig {
    /// Plaintext downstream at `service_address`
    #[must_use]
    pub fn new(service_address: impl Into<String>) -> Self {
        Self {
            service_address: service_address.into(),
            client_timeout_ms: None,
            connect_timeout_ms: None,
            tls: None,
            user_agent: None,
        }
    }
}

/// Client TLS settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientTlsConfig {
    /// PEM bundle of trusted roots
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    /// Name verified against the server certificate
    #[serde(default)]
    pub domain_name: Option<String>,
}

fn default_token_headers() -> Vec<String> {
    vec!["authorization".to_string()]
}

const fn default_leeway_seconds() -> u64 {
    30
}

const fn default_cache_ttl_seconds() -> u64 {
    3600
}

const fn default_cache_refresh_seconds() -> u64 {
    300
}

fn default_host_name() -> String {
    "0.0.0.0".to_string()
}

impl RuntimeConfig {
    /// Loads configuration from an optional YAML file and the environment.
    ///
    /// Sources, lowest precedence first: the file at `path` (if it exists),
    /// `APP__`-prefixed variables with `__` as the nesting separator, then the
    /// shorthand variables `LOG_LEVEL`, `GRPC_PORT` and `ADMIN_PORT`.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let mut config: Self = builder
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(level) = env::var("LOG_LEVEL") {
            self.library.log.level = level;
        }
        if let Some(grpc) = self.gen_code.upstream.grpc.as_mut() {
            grpc.port = parse_env("GRPC_PORT", grpc.port)?;
        }
        if let Some(admin) = self.gen_code.admin.as_mut() {
            admin.port = parse_env("ADMIN_PORT", admin.port)?;
        }
        Ok(())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.library.log.level.trim().is_empty() {
            return Err(ConfigError::MissingRequired("library.log.level".to_string()));
        }
        if let Some(jwt) = self.jwt_auth() {
            validate_jwt(jwt)?;
        }
        if self.gen_code.upstream.context_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                field: "gen_code.upstream.context_timeout_ms".to_string(),
            });
        }
        for (field, server) in [
            ("gen_code.upstream.grpc", self.gen_code.upstream.grpc.as_ref()),
            ("gen_code.upstream.http", self.gen_code.upstream.http.as_ref()),
            ("gen_code.admin", self.gen_code.admin.as_ref()),
        ] {
            if let Some(server) = server {
                validate_server(field, server)?;
            }
        }
        for (name, downstream) in &self.gen_code.downstream {
            validate_downstream(name, downstream)?;
        }
        Ok(())
    }

    /// `library.authentication.jwtauth`, when configured
    #[must_use]
    pub fn jwt_auth(&self) -> Option<&JwtAuthConfig> {
        self.library
            .authentication
            .as_ref()
            .and_then(|auth| auth.jwtauth.as_ref())
    }

    /// Whether `development.disable_all_authorization_rules` is set
    #[must_use]
    pub fn authorization_disabled(&self) -> bool {
        self.development
            .as_ref()
            .is_some_and(|dev| dev.disable_all_authorization_rules)
    }

    /// Set the JWT authentication block
    #[must_use]
    pub fn with_jwt_auth(mut self, jwt: JwtAuthConfig) -> Self {
        self.library.authentication = Some(AuthenticationConfig { jwtauth: Some(jwt) });
        self
    }

    /// Set `development.disable_all_authorization_rules`
    #[must_use]
    pub fn with_authorization_disabled(mut self, disabled: bool) -> Self {
        self.development = Some(DevelopmentConfig {
            disable_all_authorization_rules: disabled,
        });
        self
    }

    /// Set the public gRPC listener
    #[must_use]
    pub fn with_grpc_server(mut self, server: ServerConfig) -> Self {
        self.gen_code.upstream.grpc = Some(server);
        self
    }

    /// Set the admin listener
    #[must_use]
    pub fn with_admin_server(mut self, server: ServerConfig) -> Self {
        self.gen_code.admin = Some(server);
        self
    }
}

fn validate_jwt(jwt: &JwtAuthConfig) -> Result<(), ConfigError> {
    if jwt.issuers.is_empty() {
        return Err(ConfigError::MissingRequired(
            "library.authentication.jwtauth.issuers".to_string(),
        ));
    }
    if jwt.headers.iter().all(|h| h.trim().is_empty()) {
        return Err(ConfigError::MissingRequired(
            "library.authentication.jwtauth.headers".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for issuer in &jwt.issuers {
        if issuer.name.trim().is_empty() {
            return Err(ConfigError::MissingRequired(
                "library.authentication.jwtauth.issuers[].name".to_string(),
            ));
        }
        if !seen.insert(issuer.name.as_str()) {
            return Err(ConfigError::DuplicateIssuer(issuer.name.clone()));
        }
        if !matches!(issuer.jwks_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                field: format!("jwtauth.issuers[{}].jwks_url", issuer.name),
                reason: format!("unsupported scheme {}", issuer.jwks_url.scheme()),
            });
        }
        if issuer.cache_ttl_seconds == 0 {
            return Err(ConfigError::InvalidTtl {
                field: format!("jwtauth.issuers[{}].cache_ttl_seconds", issuer.name),
            });
        }
    }
    Ok(())
}

fn validate_server(field: &str, server: &ServerConfig) -> Result<(), ConfigError> {
    if server.host_name.trim().is_empty() {
        return Err(ConfigError::MissingRequired(format!("{field}.host_name")));
    }
    if let Some(tls) = &server.tls {
        if tls.cert_path.as_os_str().is_empty() || tls.key_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired(format!(
                "{field}.tls.cert_path and {field}.tls.key_path"
            )));
        }
    }
    if server.concurrency_limit == Some(0) {
        return Err(ConfigError::ParseError {
            name: format!("{field}.concurrency_limit"),
            reason: "limit must be greater than 0".to_string(),
        });
    }
    Ok(())
}

fn validate_downstream(name: &str, downstream: &GrpcDownstreamConfig) -> Result<(), ConfigError> {
    let field = format!("gen_code.downstream.{name}.service_address");
    let uri: http::Uri = downstream
        .service_address
        .parse()
        .map_err(|e: http::uri::InvalidUri| ConfigError::InvalidUrl {
            field: field.clone(),
            reason: e.to_string(),
        })?;
    if uri.scheme().is_none() || uri.host().is_none() {
        return Err(ConfigError::InvalidUrl {
            field,
            reason: "expected scheme://host:port".to_string(),
        });
    }
    if downstream.client_timeout_ms == Some(0) {
        return Err(ConfigError::InvalidTimeout {
            field: format!("gen_code.downstream.{name}.client_timeout_ms"),
        });
    }
    Ok(())
}

/// Parse an environment variable with a default value.
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::ParseError {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
