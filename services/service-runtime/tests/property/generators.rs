//! Proptest Generators
//!
//! Shared generators for property-based tests.

use proptest::prelude::*;
use service_runtime::jwt::Claims;

/// Generates OAuth scope names
pub fn arb_scope() -> impl Strategy<Value = String> {
    "[a-z]{2,8}(:[a-z]{2,8})?"
}

/// Generates scope sets
pub fn arb_scopes() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(arb_scope(), 0..6)
}

/// Generates verified claims carrying `scopes`
pub fn arb_claims() -> impl Strategy<Value = Claims> {
    (arb_scopes(), "[a-z0-9-]{1,16}", prop::collection::vec("[a-z]{3,10}", 0..3)).prop_map(
        |(scopes, sub, aud)| Claims {
            iss: "https://issuer.test".to_string(),
            sub,
            aud,
            exp: i64::MAX,
            scope: Some(scopes.join(" ")),
            ..Claims::default()
        },
    )
}

/// Generates interceptor names
pub fn arb_interceptor_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z][a-z_]{2,12}", 0..8)
}

/// Generates sensitive content patterns
pub fn arb_sensitive_content() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("password=secret123".to_string()),
        Just("Bearer eyJhbGciOiJSUzI1NiJ9".to_string()),
        Just("api_key: sk-1234567890".to_string()),
        Just("failed to fetch JWKS from https://issuer.test".to_string()),
        Just("private_key: -----BEGIN RSA-----".to_string()),
        "[a-zA-Z0-9_]{5,20}".prop_map(|s| format!("password={s}")),
    ]
}
