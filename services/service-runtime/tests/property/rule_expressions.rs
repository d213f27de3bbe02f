//! Rule Expression Property Tests
//!
//! Validates that compiled rule expressions agree with the claims they
//! are evaluated against, and that the parser rejects rather than panics.

use super::generators::{arb_claims, arb_scope};
use proptest::prelude::*;
use service_runtime::authrules::{ClaimsRuleCompiler, DefaultClaimsRuleCompiler, Expr};

fn has_scope(scope: &str) -> String {
    format!(r#"jwtHasScope("{scope}")"#)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: `jwtHasScope` holds exactly when the scope was granted
    #[test]
    fn prop_scope_membership(claims in arb_claims(), scope in arb_scope()) {
        let granted = claims
            .scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .any(|s| s == scope);

        let predicate = DefaultClaimsRuleCompiler.compile(&has_scope(&scope)).unwrap();

        prop_assert_eq!(predicate.evaluate(&claims), granted);
    }

    /// Property: boolean operators follow boolean logic
    #[test]
    fn prop_operators(claims in arb_claims(), a in arb_scope(), b in arb_scope()) {
        let eval = |source: String| Expr::parse(&source).unwrap().evaluate(&claims);
        let pa = eval(has_scope(&a));
        let pb = eval(has_scope(&b));

        prop_assert_eq!(eval(format!("{} && {}", has_scope(&a), has_scope(&b))), pa && pb);
        prop_assert_eq!(eval(format!("{} || {}", has_scope(&a), has_scope(&b))), pa || pb);
        prop_assert_eq!(eval(format!("!({})", has_scope(&a))), !pa);
        prop_assert_eq!(
            eval(format!("!{} || ({} && true)", has_scope(&a), has_scope(&b))),
            !pa || pb
        );
    }

    /// Property: `&&` binds tighter than `||`
    #[test]
    fn prop_precedence(x in any::<bool>(), y in any::<bool>(), z in any::<bool>(), claims in arb_claims()) {
        let source = format!("{x} || {y} && {z}");
        prop_assert_eq!(Expr::parse(&source).unwrap().evaluate(&claims), x || (y && z));
    }

    /// Property: the parser never panics, and errors point inside the input
    #[test]
    fn prop_parse_never_panics(source in "\\PC{0,64}") {
        if let Err(err) = Expr::parse(&source) {
            prop_assert!(err.offset <= source.len());
        }
    }

    /// Property: a truncated function call is rejected
    #[test]
    fn prop_truncated_calls_are_rejected(scope in arb_scope(), cut in 1usize..10) {
        let source = has_scope(&scope);
        let truncated = &source[..source.len() - cut.min(source.len() - 1)];
        prop_assert!(Expr::parse(truncated).is_err());
    }
}
