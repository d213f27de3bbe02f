//! Rule resolution and enforcement against a mock identity provider

use super::support::{
    ISSUER, broken_identity_provider, expired_token, identity_provider, jwt_config, sign,
    token_with_scope,
};
use http::{HeaderMap, HeaderValue, header::AUTHORIZATION};
use parking_lot::Mutex;
use serde_json::json;
use service_runtime::authrules::{
    ClaimsPredicate, ClaimsRuleCompiler, RuleCompileError, resolve_endpoint_rules,
    resolve_grpc_authorization_rule, resolve_rest_authorization_rule,
};
use service_runtime::config::RuntimeConfig;
use service_runtime::error::{AuthError, CallError, RuntimeError};
use service_runtime::hooks::Hooks;
use service_runtime::jwt::{
    Authenticator, AuthenticatorRegistry, Claims, HttpConfig, build_http_client,
};
use service_runtime::{CallContext, Endpoint, Rule};
use std::sync::Arc;
use std::time::Duration;

const READ_ORDERS: &str = r#"jwtHasScope("orders:read")"#;

fn registry() -> AuthenticatorRegistry {
    AuthenticatorRegistry::new(build_http_client(&HttpConfig::default()).unwrap(), None)
}

fn call_with(token: Option<&str>) -> CallContext {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
    }
    CallContext::new("/orders.v1.Orders/List", headers, None)
}

#[tokio::test]
async fn endpoints_share_one_authenticator() {
    let provider = identity_provider(Some(1)).await;
    let config = RuntimeConfig::default().with_jwt_auth(jwt_config(&provider));
    let registry = registry();
    let endpoints = [
        Endpoint::grpc("/orders.v1.Orders/List").with_rule(READ_ORDERS),
        Endpoint::grpc("/orders.v1.Orders/Get").with_rule(READ_ORDERS),
        Endpoint::rest("DELETE /orders/{id}").with_rule(r#"jwtHasScope("orders:admin")"#),
        Endpoint::rest("GET /healthz"),
    ];

    let rules = resolve_endpoint_rules(&endpoints, &Hooks::default(), &config, &registry)
        .await
        .unwrap();

    assert_eq!(rules.len(), 3);
    assert!(rules.get("GET /healthz").is_none());
    let authenticators: Vec<_> = ["/orders.v1.Orders/List", "/orders.v1.Orders/Get", "DELETE /orders/{id}"]
        .iter()
        .map(|name| match rules.get(name) {
            Some(Rule::ClaimsBased(rule)) => Arc::clone(rule.authenticator()),
            other => panic!("expected a claims-based rule for {name}, got {other:?}"),
        })
        .collect();
    assert!(Arc::ptr_eq(&authenticators[0], &authenticators[1]));
    assert!(Arc::ptr_eq(&authenticators[0], &authenticators[2]));
    assert_eq!(registry.constructed_count(), 1);
    assert_eq!(authenticators[0].jwks_fetch_count(), 1);

    registry.shutdown().await;
}

#[tokio::test]
async fn scope_decides_access() {
    let provider = identity_provider(None).await;
    let config = RuntimeConfig::default().with_jwt_auth(jwt_config(&provider));
    let registry = registry();
    let rules = resolve_endpoint_rules(
        &[Endpoint::grpc("/orders.v1.Orders/List").with_rule(READ_ORDERS)],
        &Hooks::default(),
        &config,
        &registry,
    )
    .await
    .unwrap();
    let endpoint = "/orders.v1.Orders/List";

    let allowed = call_with(Some(&token_with_scope("orders:read orders:write")));
    assert!(rules.authorize(endpoint, &allowed).await.is_ok());

    let denied = call_with(Some(&token_with_scope("profile")));
    assert!(matches!(
        rules.authorize(endpoint, &denied).await,
        Err(CallError::Unauthorized { endpoint: ref e }) if e == endpoint
    ));

    let anonymous = call_with(None);
    assert!(matches!(
        rules.authorize(endpoint, &anonymous).await,
        Err(CallError::Unauthenticated(AuthError::TokenMissing))
    ));

    let expired = call_with(Some(&expired_token()));
    assert!(matches!(
        rules.authorize(endpoint, &expired).await,
        Err(CallError::Unauthenticated(AuthError::TokenExpired))
    ));

    registry.shutdown().await;
}

#[tokio::test]
async fn token_from_untrusted_issuer_is_rejected() {
    let provider = identity_provider(None).await;
    let config = RuntimeConfig::default().with_jwt_auth(jwt_config(&provider));
    let registry = registry();
    let rule = resolve_grpc_authorization_rule(
        "/orders.v1.Orders/List",
        READ_ORDERS,
        &Hooks::default(),
        &config,
        &registry,
    )
    .await
    .unwrap();

    let now = chrono::Utc::now().timestamp();
    let foreign = sign(&json!({
        "iss": "https://elsewhere.test",
        "sub": "user-1",
        "exp": now + 300,
        "scope": "orders:read",
    }));
    let decision = rule.evaluate(&call_with(Some(&foreign))).await;
    assert!(!decision.is_allowed());
    assert_eq!(decision.label(), "unauthenticated");

    registry.shutdown().await;
}

#[tokio::test]
async fn development_mode_grants_everything_without_compiling() {
    let provider = identity_provider(Some(0)).await;
    let config = RuntimeConfig::default()
        .with_jwt_auth(jwt_config(&provider))
        .with_authorization_disabled(true);
    let registry = registry();

    let rule = resolve_rest_authorization_rule(
        "GET /orders",
        "this is not ( an expression",
        &Hooks::default(),
        &config,
        &registry,
    )
    .await
    .unwrap();

    assert!(matches!(rule, Rule::InsecureAlwaysGrantAccess));
    assert!(rule.evaluate(&call_with(None)).await.is_allowed());
    assert_eq!(registry.constructed_count(), 0);
}

#[tokio::test]
async fn missing_jwt_configuration_is_reported() {
    let registry = registry();
    let err = resolve_grpc_authorization_rule(
        "/orders.v1.Orders/List",
        READ_ORDERS,
        &Hooks::default(),
        &RuntimeConfig::default(),
        &registry,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        RuntimeError::AuthenticationConfigMissing { ref endpoint } if endpoint == "/orders.v1.Orders/List"
    ));
}

#[tokio::test]
async fn invalid_expression_fails_before_any_fetch() {
    let provider = identity_provider(Some(0)).await;
    let config = RuntimeConfig::default().with_jwt_auth(jwt_config(&provider));
    let registry = registry();

    let err = resolve_endpoint_rules(
        &[Endpoint::grpc("/orders.v1.Orders/List").with_rule(r#"jwtHasScope("orders:read") &&"#)],
        &Hooks::default(),
        &config,
        &registry,
    )
    .await
    .unwrap_err();

    match err {
        RuntimeError::RuleExpressionInvalid {
            endpoint,
            expression,
            ..
        } => {
            assert_eq!(endpoint, "/orders.v1.Orders/List");
            assert_eq!(expression, r#"jwtHasScope("orders:read") &&"#);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(registry.constructed_count(), 0);
}

#[tokio::test]
async fn deeply_nested_expression_is_a_resolution_error() {
    let provider = identity_provider(Some(0)).await;
    let config = RuntimeConfig::default().with_jwt_auth(jwt_config(&provider));
    let registry = registry();
    let expression = format!("{}{READ_ORDERS}", "!".repeat(200_000));

    let err = resolve_rest_authorization_rule(
        "GET /orders",
        &expression,
        &Hooks::default(),
        &config,
        &registry,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        RuntimeError::RuleExpressionInvalid { ref reason, .. } if reason.contains("nested deeper")
    ));
    assert_eq!(registry.constructed_count(), 0);
}

#[tokio::test]
async fn unreachable_key_set_fails_resolution() {
    let provider = broken_identity_provider().await;
    let config = RuntimeConfig::default().with_jwt_auth(jwt_config(&provider));
    let registry = registry();

    let err = resolve_grpc_authorization_rule(
        "/orders.v1.Orders/List",
        READ_ORDERS,
        &Hooks::default(),
        &config,
        &registry,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        RuntimeError::AuthenticatorUnavailable { ref issuer, .. } if issuer == ISSUER
    ));
    assert_eq!(registry.constructed_count(), 0);
}

struct SubjectAllowList {
    seen: Arc<Mutex<Vec<String>>>,
}

impl ClaimsRuleCompiler for SubjectAllowList {
    fn compile(&self, expression: &str) -> Result<Arc<dyn ClaimsPredicate>, RuleCompileError> {
        self.seen.lock().push(expression.to_string());
        let allowed: Vec<String> = expression.split(',').map(|s| s.trim().to_string()).collect();
        if allowed.iter().any(String::is_empty) {
            return Err(RuleCompileError::new(0, "empty subject"));
        }
        Ok(Arc::new(move |claims: &Claims| allowed.contains(&claims.sub)))
    }
}

#[tokio::test]
async fn custom_compiler_replaces_the_builtin_language() {
    let provider = identity_provider(None).await;
    let config = RuntimeConfig::default().with_jwt_auth(jwt_config(&provider));
    let registry = registry();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let hooks = Hooks::default().with_claims_rule_compiler(SubjectAllowList {
        seen: Arc::clone(&seen),
    });

    let rule = resolve_rest_authorization_rule(
        "GET /orders",
        "user-1, user-2",
        &hooks,
        &config,
        &registry,
    )
    .await
    .unwrap();

    assert_eq!(seen.lock().as_slice(), ["user-1, user-2"]);
    let token = token_with_scope("");
    assert!(rule.evaluate(&call_with(Some(&token))).await.is_allowed());

    let err = resolve_rest_authorization_rule("GET /admin", "user-1,", &hooks, &config, &registry)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::RuleExpressionInvalid { .. }));

    registry.shutdown().await;
}

#[tokio::test]
async fn key_sets_are_refreshed_in_the_background_until_shutdown() {
    let provider = identity_provider(None).await;
    let mut jwt = jwt_config(&provider);
    jwt.issuers[0] = jwt.issuers[0].clone().with_refresh_seconds(1);
    let authenticator = Authenticator::from_config(
        &jwt,
        build_http_client(&HttpConfig::default()).unwrap(),
        None,
    )
    .await
    .unwrap();
    assert_eq!(authenticator.jwks_fetch_count(), 1);

    tokio::time::sleep(Duration::from_millis(2_500)).await;

    assert!(authenticator.is_refreshing());
    assert!(authenticator.jwks_fetch_count() >= 2);
    let claims = authenticator
        .authenticate(&token_with_scope("orders:read"))
        .await
        .unwrap();
    assert_eq!(claims.iss, ISSUER);

    authenticator.shutdown();
    let fetched = authenticator.jwks_fetch_count();
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    assert!(!authenticator.is_refreshing());
    assert_eq!(authenticator.jwks_fetch_count(), fetched);
}
