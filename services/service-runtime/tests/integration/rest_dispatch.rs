//! REST handlers behind the full runtime: listener, interceptors, rules

use super::support::{identity_provider, jwt_config, token_with_scope};
use axum::Router;
use axum::extract::{Extension, State};
use axum::response::Response;
use axum::routing::get;
use serde_json::{Value, json};
use service_runtime::config::ServerConfig;
use service_runtime::error::{CallError, ErrorCode, ErrorResponse, RuntimeError};
use service_runtime::middleware::trace::TRACE_ID_HEADER;
use service_runtime::{
    CallContext, Dispatcher, Endpoint, Hooks, RuntimeConfig, ServiceRuntime, StoppableServer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use wiremock::MockServer;

const LIST_ORDERS: &str = "GET /orders";

async fn list_orders(
    State(dispatcher): State<Arc<Dispatcher>>,
    Extension(ctx): Extension<CallContext>,
) -> Response {
    dispatcher
        .rest(LIST_ORDERS, ctx, |ctx| async move {
            Ok(json!({
                "orders": ["o-1", "o-2"],
                "trace_id": ctx.trace_id(),
            }))
        })
        .await
}

struct Running {
    base: String,
    runtime: Arc<ServiceRuntime>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), RuntimeError>>,
    _provider: MockServer,
}

impl Running {
    async fn start(hooks: Hooks) -> Self {
        let provider = identity_provider(Some(1)).await;
        let mut config = RuntimeConfig::default().with_jwt_auth(jwt_config(&provider));
        config.gen_code.upstream.http = Some(ServerConfig::new("127.0.0.1", 0));
        let runtime = Arc::new(ServiceRuntime::new(config, hooks).unwrap());

        let rules = runtime
            .resolve_rules(&[
                Endpoint::rest(LIST_ORDERS).with_rule(r#"jwtHasScope("orders:read")"#),
            ])
            .await
            .unwrap();
        let router = Router::new()
            .route("/orders", get(list_orders))
            .with_state(Arc::new(runtime.dispatcher(rules)));
        let server = Arc::new(runtime.http_server(router).unwrap());

        let (stop, stopped) = oneshot::channel();
        let task = {
            let runtime = Arc::clone(&runtime);
            let servers: Vec<Arc<dyn StoppableServer>> = vec![server.clone()];
            tokio::spawn(async move {
                runtime
                    .serve(servers, async move {
                        let _ = stopped.await;
                    })
                    .await
            })
        };
        let addr = tokio::time::timeout(Duration::from_secs(5), server.wait_listening())
            .await
            .unwrap()
            .unwrap();

        Self {
            base: format!("http://{addr}"),
            runtime,
            stop,
            task,
            _provider: provider,
        }
    }

    async fn get(&self, token: Option<&str>) -> reqwest::Response {
        let mut request = reqwest::Client::new()
            .get(format!("{}/orders", self.base))
            .header(TRACE_ID_HEADER, "4bf92f3577b34da6a3ce929d0e0e4736");
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.unwrap()
    }

    async fn shutdown(self) {
        self.stop.send(()).unwrap();
        self.task.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn authorized_call_reaches_the_handler() {
    let running = Running::start(Hooks::default()).await;

    let response = running.get(Some(&token_with_scope("orders:read"))).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["orders"], json!(["o-1", "o-2"]));
    assert_eq!(body["trace_id"], "4bf92f3577b34da6a3ce929d0e0e4736");

    let allowed = running
        .runtime
        .metrics()
        .authorization_decisions
        .with_label_values(&[LIST_ORDERS, "allow"])
        .get();
    assert_eq!(allowed, 1.0);

    running.shutdown().await;
}

#[tokio::test]
async fn missing_token_is_unauthenticated() {
    let running = Running::start(Hooks::default()).await;

    let response = running.get(None).await;
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"]["code"], "UNAUTHENTICATED");

    running.shutdown().await;
}

#[tokio::test]
async fn missing_scope_is_forbidden() {
    let running = Running::start(Hooks::default()).await;

    let response = running.get(Some(&token_with_scope("profile"))).await;
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"]["code"], "PERMISSION_DENIED");

    running.shutdown().await;
}

#[tokio::test]
async fn error_mapper_rewrites_denials() {
    let hooks = Hooks::default().with_error_mapper(|ctx: &CallContext, err: &CallError| {
        matches!(err, CallError::Unauthorized { .. }).then(|| {
            ErrorResponse::new(ErrorCode::NotFound, "No such resource", ctx.correlation_id())
        })
    });
    let running = Running::start(hooks).await;

    let response = running.get(Some(&token_with_scope("profile"))).await;
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"]["description"], "No such resource");

    let response = running.get(None).await;
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    running.shutdown().await;
}
