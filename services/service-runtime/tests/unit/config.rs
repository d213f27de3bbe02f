//! Configuration loading and validation

use service_runtime::config::{ConfigError, IssuerConfig, JwtAuthConfig, LogFormat, ServerConfig};
use service_runtime::RuntimeConfig;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const FULL_CONFIG: &str = r"
library:
  log:
    level: debug
    format: json
  shutdown_timeout_seconds: 5
  authentication:
    jwtauth:
      issuers:
        - name: https://issuer.test
          jwks_url: https://issuer.test/.well-known/jwks.json
          cache_refresh_seconds: 0
      leeway_seconds: 10
development:
  disable_all_authorization_rules: true
gen_code:
  upstream:
    context_timeout_ms: 1500
    grpc:
      host_name: 127.0.0.1
      port: 0
      max_concurrent_streams: 128
  admin:
    host_name: 127.0.0.1
    port: 0
  downstream:
    orders:
      service_address: http://orders:50051
      client_timeout_ms: 250
";

/// A YAML file removed when dropped
struct TempConfig(PathBuf);

impl TempConfig {
    fn new(contents: &str) -> Self {
        let path = std::env::temp_dir().join(format!("service-runtime-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        Self(path)
    }
}

impl Drop for TempConfig {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn issuer_url() -> Url {
    Url::parse("https://issuer.test/.well-known/jwks.json").unwrap()
}

#[test]
fn loads_every_section_from_yaml() {
    let file = TempConfig::new(FULL_CONFIG);

    let config = RuntimeConfig::load(Some(&file.0)).unwrap();

    assert_eq!(config.library.log.level, "debug");
    assert_eq!(config.library.log.format, LogFormat::Json);
    assert_eq!(config.library.shutdown_timeout_seconds, 5);
    assert!(config.authorization_disabled());

    let jwt = config.jwt_auth().unwrap();
    assert_eq!(jwt.issuers.len(), 1);
    assert_eq!(jwt.issuers[0].name, "https://issuer.test");
    assert_eq!(jwt.issuers[0].cache_refresh_seconds, 0);
    assert_eq!(jwt.issuers[0].cache_ttl_seconds, 3600);
    assert_eq!(jwt.headers, ["authorization"]);
    assert_eq!(jwt.leeway(), Duration::from_secs(10));

    assert_eq!(config.gen_code.upstream.context_timeout(), Duration::from_millis(1500));
    let grpc = config.gen_code.upstream.grpc.as_ref().unwrap();
    assert_eq!(grpc.address(), "127.0.0.1:0");
    assert_eq!(grpc.max_concurrent_streams, Some(128));
    assert!(config.gen_code.upstream.http.is_none());
    assert_eq!(
        config.gen_code.downstream["orders"].client_timeout_ms,
        Some(250)
    );
}

#[test]
fn missing_file_yields_defaults() {
    let path = std::env::temp_dir().join(format!("absent-{}.yaml", uuid::Uuid::new_v4()));

    let config = RuntimeConfig::load(Some(&path)).unwrap();

    assert!(config.jwt_auth().is_none());
    assert!(!config.authorization_disabled());
    assert_eq!(config.gen_code.upstream.context_timeout(), Duration::from_secs(30));
}

#[test]
fn invalid_file_is_rejected_on_load() {
    let file = TempConfig::new(
        r"
gen_code:
  upstream:
    context_timeout_ms: 0
",
    );

    let err = RuntimeConfig::load(Some(&file.0)).unwrap_err();

    assert!(matches!(err, ConfigError::InvalidTimeout { .. }));
}

#[test]
fn issuers_need_distinct_names() {
    let jwt = JwtAuthConfig {
        issuers: vec![
            IssuerConfig::new("https://issuer.test", issuer_url()),
            IssuerConfig::new("https://issuer.test", issuer_url()).with_ttl_seconds(60),
        ],
        ..JwtAuthConfig::single_issuer("https://issuer.test", issuer_url())
    };

    let err = RuntimeConfig::default().with_jwt_auth(jwt).validate().unwrap_err();

    assert!(matches!(err, ConfigError::DuplicateIssuer(ref name) if name == "https://issuer.test"));
}

#[test]
fn jwks_url_must_be_http() {
    let url = Url::parse("file:///etc/jwks.json").unwrap();
    let config =
        RuntimeConfig::default().with_jwt_auth(JwtAuthConfig::single_issuer("local", url));

    assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl { .. })));
}

#[test]
fn token_headers_cannot_all_be_blank() {
    let mut jwt = JwtAuthConfig::single_issuer("https://issuer.test", issuer_url());
    jwt.headers = vec![" ".to_string()];

    let err = RuntimeConfig::default().with_jwt_auth(jwt).validate().unwrap_err();

    assert!(matches!(err, ConfigError::MissingRequired(_)));
}

#[test]
fn equal_jwt_configs_compare_equal() {
    let a = JwtAuthConfig::single_issuer("https://issuer.test", issuer_url());
    let b = JwtAuthConfig::single_issuer("https://issuer.test", issuer_url());
    let c = JwtAuthConfig::single_issuer(
        "https://issuer.test",
        Url::parse("https://issuer.test/keys").unwrap(),
    );

    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn zero_concurrency_limit_is_rejected() {
    let config = RuntimeConfig::default()
        .with_admin_server(ServerConfig::new("127.0.0.1", 9090).with_concurrency_limit(0));

    assert!(matches!(config.validate(), Err(ConfigError::ParseError { .. })));
}

#[test]
fn tls_paths_are_required_together() {
    let config = RuntimeConfig::default()
        .with_grpc_server(ServerConfig::new("127.0.0.1", 0).with_tls("", "/etc/tls/key.pem"));

    assert!(matches!(config.validate(), Err(ConfigError::MissingRequired(_))));
}
