//! Authorization rules
//!
//! Every endpoint may declare a rule expression. At startup each expression
//! is resolved into a [`Rule`]: either a claims-based check backed by a
//! shared [`Authenticator`](crate::jwt::Authenticator), or, in development
//! mode only, an unconditional grant.

pub mod expression;
pub mod resolver;
pub mod rule;

use crate::jwt::Claims;
use std::sync::Arc;
use thiserror::Error;

pub use expression::{ClaimCheck, CompiledExpression, DefaultClaimsRuleCompiler, Expr};
pub use resolver::{
    resolve_endpoint_rules, resolve_grpc_authorization_rule, resolve_rest_authorization_rule,
    resolve_rule,
};
pub use rule::{ClaimsBasedRule, Decision, DenyReason, Endpoint, EndpointRules, Rule, Transport};

/// A compiled rule expression.
pub trait ClaimsPredicate: Send + Sync {
    /// Whether verified `claims` satisfy the rule
    fn evaluate(&self, claims: &Claims) -> bool;
}

impl<F> ClaimsPredicate for F
where
    F: Fn(&Claims) -> bool + Send + Sync,
{
    fn evaluate(&self, claims: &Claims) -> bool {
        self(claims)
    }
}

/// Turns a rule expression into a predicate.
pub trait ClaimsRuleCompiler: Send + Sync {
    /// Compile `expression`
    ///
    /// # Errors
    ///
    /// [`RuleCompileError`] if the expression is not valid.
    fn compile(&self, expression: &str) -> Result<Arc<dyn ClaimsPredicate>, RuleCompileError>;
}

/// Why a rule expression did not compile.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at offset {offset}")]
pub struct RuleCompileError {
    /// Byte offset of the problem in the expression
    pub offset: usize,
    /// Description of the problem
    pub message: String,
}

impl RuleCompileError {
    /// New error at `offset`
    #[must_use]
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}
