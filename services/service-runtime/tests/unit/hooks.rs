//! Hook resolution as seen through the runtime

use parking_lot::Mutex;
use service_runtime::config::{GrpcDownstreamConfig, ServerConfig};
use service_runtime::hooks::{
    GrpcDialOption, GrpcServerOption, resolve_grpc_dial_options, resolve_grpc_server_options,
};
use service_runtime::server::ResolvedServerConfig;
use service_runtime::{Hooks, RuntimeConfig, RuntimeError, ServiceRuntime};
use std::sync::Arc;
use std::time::Duration;

fn with_downstream(name: &str, address: &str) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config
        .gen_code
        .downstream
        .insert(name.to_string(), GrpcDownstreamConfig::new(address));
    config
}

#[test]
fn default_server_options_follow_the_listener_config() {
    let mut server = ServerConfig::new("127.0.0.1", 0).with_concurrency_limit(64);
    server.max_concurrent_streams = Some(100);

    let options =
        resolve_grpc_server_options(&Hooks::default(), &server, Duration::from_secs(2)).unwrap();
    let names: Vec<_> = options.iter().map(GrpcServerOption::name).collect();

    assert_eq!(
        names,
        ["request_timeout", "max_concurrent_streams", "concurrency_limit"]
    );
}

#[test]
fn additional_server_options_come_after_defaults_and_win() {
    let hooks = Hooks::default().with_additional_grpc_server_options(vec![
        GrpcServerOption::RequestTimeout(Duration::from_millis(250)),
        GrpcServerOption::MaxFrameSize(1 << 20),
    ]);

    let resolved = ResolvedServerConfig::grpc(
        "grpc",
        &ServerConfig::new("127.0.0.1", 0),
        &hooks,
        service_runtime::InterceptorChain::new(Vec::new()),
        Duration::from_secs(30),
    )
    .unwrap();

    let names: Vec<_> = resolved.options.iter().map(GrpcServerOption::name).collect();
    assert_eq!(names, ["request_timeout", "request_timeout", "max_frame_size"]);
    assert_eq!(resolved.settings.request_timeout, Some(Duration::from_millis(250)));
    assert_eq!(resolved.settings.max_frame_size, Some(1 << 20));
    assert_eq!(resolved.address, "127.0.0.1:0");
}

#[test]
fn server_override_error_is_propagated() {
    let hooks = Hooks::default()
        .with_override_grpc_server_options(|_| Err(anyhow::anyhow!("no options for you")));

    let err = resolve_grpc_server_options(
        &hooks,
        &ServerConfig::new("127.0.0.1", 0),
        Duration::from_secs(1),
    )
    .unwrap_err();

    assert!(matches!(err, RuntimeError::Internal(_)));
    assert!(err.to_string().contains("no options for you"));
}

#[test]
fn dial_defaults_reflect_downstream_timeouts() {
    let mut downstream = GrpcDownstreamConfig::new("http://orders:50051");
    downstream.client_timeout_ms = Some(250);
    downstream.connect_timeout_ms = Some(100);
    downstream.user_agent = Some("orders-client".to_string());

    let options = resolve_grpc_dial_options("orders", &Hooks::default(), &downstream).unwrap();
    let names: Vec<_> = options.iter().map(GrpcDialOption::name).collect();

    assert!(names.contains(&"timeout"));
    assert!(names.contains(&"connect_timeout"));
    assert!(names.contains(&"user_agent"));
    assert!(!names.contains(&"tls"));
}

#[tokio::test]
async fn dial_override_receives_the_service_name() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let hooks = Hooks::default().with_override_grpc_dial_options(move |name, downstream| {
        recorder
            .lock()
            .push(format!("{name}={}", downstream.service_address));
        Ok(vec![GrpcDialOption::TcpNodelay(true)])
    });
    let runtime =
        ServiceRuntime::new(with_downstream("orders", "http://orders:50051"), hooks).unwrap();

    runtime.dial("orders").unwrap();

    assert_eq!(seen.lock().as_slice(), ["orders=http://orders:50051"]);
}

#[tokio::test]
async fn dialing_an_unknown_service_names_the_missing_section() {
    let runtime = ServiceRuntime::new(RuntimeConfig::default(), Hooks::default()).unwrap();

    let err = runtime.dial("billing").unwrap_err();

    assert!(matches!(
        err,
        RuntimeError::MissingSection { ref section } if section == "gen_code.downstream.billing"
    ));
}

#[test]
fn dial_hook_conflict_is_rejected_at_construction() {
    let hooks = Hooks::default()
        .with_additional_grpc_dial_options(vec![GrpcDialOption::TcpNodelay(false)])
        .with_override_grpc_dial_options(|_, _| Ok(Vec::new()));

    let err = ServiceRuntime::new(RuntimeConfig::default(), hooks).unwrap_err();

    assert!(matches!(
        err,
        RuntimeError::ConfigurationConflict {
            additive: "AdditionalGrpcDialOptions",
            override_: "OverrideGrpcDialOptions",
        }
    ));
}

#[test]
fn validate_hook_runs_before_validation() {
    let hooks = Hooks::default().with_validate_config(|config| {
        config.gen_code.upstream.context_timeout_ms = 1_500;
        Ok(())
    });
    let mut config = RuntimeConfig::default();
    config.gen_code.upstream.context_timeout_ms = 0;

    let runtime = ServiceRuntime::new(config, hooks).unwrap();

    assert_eq!(runtime.context_timeout(), Duration::from_millis(1_500));
}

#[test]
fn validate_hook_can_reject_the_configuration() {
    let hooks = Hooks::default()
        .with_validate_config(|_| Err(anyhow::anyhow!("admin listener is mandatory")));

    let err = ServiceRuntime::new(RuntimeConfig::default(), hooks).unwrap_err();

    assert!(err.to_string().contains("admin listener is mandatory"));
}

#[test]
fn listeners_require_their_sections() {
    let runtime = ServiceRuntime::new(RuntimeConfig::default(), Hooks::default()).unwrap();

    let err = runtime.admin_server(axum::Router::new()).unwrap_err();

    assert!(matches!(
        err,
        RuntimeError::MissingSection { ref section } if section == "gen_code.admin"
    ));
}
