//! Executable authorization rules

use super::ClaimsPredicate;
use crate::error::{AuthError, CallError};
use crate::jwt::Authenticator;
use crate::middleware::CallContext;
use crate::observability::metrics::RuntimeMetrics;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, error};

/// Transport an endpoint is served on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// gRPC method
    Grpc,
    /// REST endpoint
    Rest,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Grpc => "gRPC",
            Self::Rest => "REST",
        })
    }
}

/// An endpoint as declared by generated code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Stable name; for gRPC the full method path `/pkg.Service/Method`
    pub name: String,
    /// Rule expression, if the endpoint declares one
    pub rule_expression: Option<String>,
    /// Transport the endpoint is served on
    pub transport: Transport,
}

impl Endpoint {
    /// gRPC method
    #[must_use]
    pub fn grpc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rule_expression: None,
            transport: Transport::Grpc,
        }
    }

    /// REST endpoint
    #[must_use]
    pub fn rest(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rule_expression: None,
            transport: Transport::Rest,
        }
    }

    /// Attach a rule expression
    #[must_use]
    pub fn with_rule(mut self, expression: impl Into<String>) -> Self {
        self.rule_expression = Some(expression.into());
        self
    }

    /// The rule expression, if present and not blank
    #[must_use]
    pub fn declared_rule(&self) -> Option<&str> {
        self.rule_expression
            .as_deref()
            .filter(|expression| !expression.trim().is_empty())
    }
}

/// Why a call was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// No acceptable token
    Unauthenticated(AuthError),
    /// Token accepted, predicate false
    Unauthorized,
}

/// Outcome of evaluating a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Proceed to the handler
    Allow,
    /// Reject the call
    Deny(DenyReason),
}

impl Decision {
    /// Whether the call may proceed
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Label used in metrics
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny(DenyReason::Unauthenticated(_)) => "unauthenticated",
            Self::Deny(DenyReason::Unauthorized) => "unauthorized",
        }
    }

    /// Convert to the call error raised for `endpoint`
    ///
    /// # Errors
    ///
    /// The matching [`CallError`] for a denial.
    pub fn into_result(self, endpoint: &str) -> Result<(), CallError> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(DenyReason::Unauthenticated(err)) => Err(CallError::Unauthenticated(err)),
            Self::Deny(DenyReason::Unauthorized) => Err(CallError::Unauthorized {
                endpoint: endpoint.to_string(),
            }),
        }
    }
}

/// Authorization rule of one endpoint.
#[derive(Clone)]
pub enum Rule {
    /// Grants every call. Only produced when authorization is disabled for development.
    InsecureAlwaysGrantAccess,
    /// Verifies the bearer token and checks its claims
    ClaimsBased(ClaimsBasedRule),
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsecureAlwaysGrantAccess => f.write_str("InsecureAlwaysGrantAccess"),
            Self::ClaimsBased(rule) => f
                .debug_struct("ClaimsBased")
                .field("endpoint", &rule.endpoint)
                .field("transport", &rule.transport)
                .finish_non_exhaustive(),
        }
    }
}

impl Rule {
    /// Evaluate the rule for a call. Never panics and never errors: every
    /// failure is a denial.
    pub async fn evaluate(&self, ctx: &CallContext) -> Decision {
        match self {
            Self::InsecureAlwaysGrantAccess => Decision::Allow,
            Self::ClaimsBased(rule) => rule.evaluate(ctx).await,
        }
    }
}

/// A claims predicate guarded by token verification.
#[derive(Clone)]
pub struct ClaimsBasedRule {
    pub(crate) endpoint: String,
    pub(crate) transport: Transport,
    pub(crate) predicate: Arc<dyn ClaimsPredicate>,
    pub(crate) authenticator: Arc<Authenticator>,
}

impl ClaimsBasedRule {
    /// Endpoint the rule belongs to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Transport of the endpoint
    #[must_use]
    pub const fn transport(&self) -> Transport {
        self.transport
    }

    /// Shared authenticator backing the rule
    #[must_use]
    pub const fn authenticator(&self) -> &Arc<Authenticator> {
        &self.authenticator
    }

    async fn evaluate(&self, ctx: &CallContext) -> Decision {
        let token = match self.authenticator.extract_token(ctx.headers()) {
            Ok(token) => token,
            Err(err) => return Decision::Deny(DenyReason::Unauthenticated(err)),
        };

        let claims = match self.authenticator.authenticate(token).await {
            Ok(claims) => claims,
            Err(err) => {
                debug!(endpoint = %self.endpoint, error = %err, "Token rejected");
                return Decision::Deny(DenyReason::Unauthenticated(err));
            }
        };

        match catch_unwind(AssertUnwindSafe(|| self.predicate.evaluate(&claims))) {
            Ok(true) => Decision::Allow,
            Ok(false) => Decision::Deny(DenyReason::Unauthorized),
            Err(_) => {
                error!(endpoint = %self.endpoint, "Authorization predicate panicked");
                Decision::Deny(DenyReason::Unauthorized)
            }
        }
    }
}

/// Rules of every endpoint that declared one.
#[derive(Default, Clone)]
pub struct EndpointRules {
    rules: HashMap<String, Rule>,
    metrics: Option<Arc<RuntimeMetrics>>,
}

impl fmt::Debug for EndpointRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.rules.iter()).finish()
    }
}

impl EndpointRules {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record decisions in `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<RuntimeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register the rule of `endpoint`
    pub fn insert(&mut self, endpoint: impl Into<String>, rule: Rule) {
        self.rules.insert(endpoint.into(), rule);
    }

    /// Rule of `endpoint`
    #[must_use]
    pub fn get(&self, endpoint: &str) -> Option<&Rule> {
        self.rules.get(endpoint)
    }

    /// Number of endpoints with a rule
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no endpoint has a rule
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Authorize a call to `endpoint`. Endpoints without a rule are open.
    ///
    /// # Errors
    ///
    /// [`CallError::Unauthenticated`] or [`CallError::Unauthorized`] on denial.
    pub async fn authorize(&self, endpoint: &str, ctx: &CallContext) -> Result<(), CallError> {
        let Some(rule) = self.rules.get(endpoint) else {
            return Ok(());
        };
        let decision = rule.evaluate(ctx).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_authorization(endpoint, decision.label());
        }
        decision.into_result(endpoint)
    }
}
