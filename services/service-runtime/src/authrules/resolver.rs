//! Startup resolution of rule expressions into executable rules

use super::expression::DefaultClaimsRuleCompiler;
use super::rule::{ClaimsBasedRule, Endpoint, EndpointRules, Rule, Transport};
use super::ClaimsRuleCompiler;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::hooks::Hooks;
use crate::jwt::AuthenticatorRegistry;
use tracing::{info, warn};

/// Resolve the rule of one endpoint.
///
/// 1. With `development.disable_all_authorization_rules` set, every endpoint
///    gets [`Rule::InsecureAlwaysGrantAccess`] and a warning is logged each time.
/// 2. The expression is compiled by the hook's compiler, or the built-in one.
/// 3. The JWT authentication block must be configured.
/// 4. The authenticator for that block is taken from `authenticators`,
///    constructing it (and fetching keys) on first use.
///
/// # Errors
///
/// [`RuntimeError::RuleExpressionInvalid`], [`RuntimeError::AuthenticationConfigMissing`]
/// or [`RuntimeError::AuthenticatorUnavailable`], in that order of checking.
pub async fn resolve_rule(
    endpoint: &str,
    transport: Transport,
    expression: &str,
    hooks: &Hooks,
    config: &RuntimeConfig,
    authenticators: &AuthenticatorRegistry,
) -> Result<Rule, RuntimeError> {
    if config.authorization_disabled() {
        warn!(
            endpoint = %endpoint,
            transport = %transport,
            "development.disableAllAuthorizationRules is set, all authorization rules are disabled, this is insecure and should not be used in production"
        );
        return Ok(Rule::InsecureAlwaysGrantAccess);
    }

    let predicate = match &hooks.override_make_jwt_claims_based_authorization_rule {
        Some(compiler) => compiler.compile(expression),
        None => DefaultClaimsRuleCompiler.compile(expression),
    }
    .map_err(|e| RuntimeError::RuleExpressionInvalid {
        endpoint: endpoint.to_string(),
        expression: expression.to_string(),
        reason: e.to_string(),
    })?;

    let jwt = config
        .jwt_auth()
        .ok_or_else(|| RuntimeError::AuthenticationConfigMissing {
            endpoint: endpoint.to_string(),
        })?;

    let authenticator = authenticators.get_or_create(jwt).await?;

    Ok(Rule::ClaimsBased(ClaimsBasedRule {
        endpoint: endpoint.to_string(),
        transport,
        predicate,
        authenticator,
    }))
}

/// Resolve the rule of a gRPC method.
///
/// # Errors
///
/// See [`resolve_rule`].
pub async fn resolve_grpc_authorization_rule(
    method: &str,
    expression: &str,
    hooks: &Hooks,
    config: &RuntimeConfig,
    authenticators: &AuthenticatorRegistry,
) -> Result<Rule, RuntimeError> {
    resolve_rule(method, Transport::Grpc, expression, hooks, config, authenticators).await
}

/// Resolve the rule of a REST endpoint.
///
/// # Errors
///
/// See [`resolve_rule`].
pub async fn resolve_rest_authorization_rule(
    endpoint: &str,
    expression: &str,
    hooks: &Hooks,
    config: &RuntimeConfig,
    authenticators: &AuthenticatorRegistry,
) -> Result<Rule, RuntimeError> {
    resolve_rule(endpoint, Transport::Rest, expression, hooks, config, authenticators).await
}

/// Resolve the rules of every endpoint that declares a non-blank expression.
///
/// # Errors
///
/// The first resolution error, in endpoint order.
pub async fn resolve_endpoint_rules(
    endpoints: &[Endpoint],
    hooks: &Hooks,
    config: &RuntimeConfig,
    authenticators: &AuthenticatorRegistry,
) -> Result<EndpointRules, RuntimeError> {
    let mut rules = EndpointRules::new();
    for endpoint in endpoints {
        let Some(expression) = endpoint.declared_rule() else {
            continue;
        };
        let rule = match endpoint.transport {
            Transport::Grpc => {
                resolve_grpc_authorization_rule(
                    &endpoint.name,
                    expression,
                    hooks,
                    config,
                    authenticators,
                )
                .await?
            }
            Transport::Rest => {
                resolve_rest_authorization_rule(
                    &endpoint.name,
                    expression,
                    hooks,
                    config,
                    authenticators,
                )
                .await?
            }
        };
        rules.insert(endpoint.name.clone(), rule);
    }
    info!(
        endpoints = endpoints.len(),
        rules = rules.len(),
        "Authorization rules resolved"
    );
    Ok(rules)
}
