//! Type-State JWT Token with compile-time validation guarantees
//!
//! This module implements the type-state pattern for JWT validation,
//! ensuring that claims can only be taken from fully validated tokens.

use std::marker::PhantomData;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header};
use serde::Deserialize;

use crate::error::AuthError;
use crate::jwt::claims::Claims;
use crate::jwt::jwk_cache::JwkCache;

/// Algorithms accepted for signatures. Symmetric algorithms are never
/// accepted because keys come from a public key set.
const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

// ============================================================================
// Sealed Trait Pattern for Token States
// ============================================================================

mod private {
    /// Sealed trait to prevent external implementations
    pub trait Sealed {}
}

/// Marker trait for token validation states
pub trait TokenState: private::Sealed {
    /// Human-readable state name for debugging
    fn state_name() -> &'static str;
}

/// Unvalidated token - just parsed, not verified
#[derive(Debug)]
pub struct Unvalidated;
impl private::Sealed for Unvalidated {}
impl TokenState for Unvalidated {
    fn state_name() -> &'static str {
        "Unvalidated"
    }
}

/// Signature validated - cryptographic verification passed
#[derive(Debug)]
pub struct SignatureValidated;
impl private::Sealed for SignatureValidated {}
impl TokenState for SignatureValidated {
    fn state_name() -> &'static str {
        "SignatureValidated"
    }
}

/// Fully validated - signature + time claims verified
#[derive(Debug)]
pub struct Validated;
impl private::Sealed for Validated {}
impl TokenState for Validated {
    fn state_name() -> &'static str {
        "Validated"
    }
}

// ============================================================================
// Type-State Token Wrapper
// ============================================================================

/// Type-state token wrapper that enforces validation at compile time
#[derive(Debug)]
pub struct Token<'a, State: TokenState> {
    raw: &'a str,
    header: Header,
    claims: Option<Claims>,
    _state: PhantomData<State>,
}

#[derive(Deserialize)]
struct UnverifiedIssuer {
    #[serde(default)]
    iss: Option<String>,
}

impl<'a> Token<'a, Unvalidated> {
    /// Parse a raw JWT string into an unvalidated token
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenMalformed`] if the header cannot be decoded.
    pub fn parse(raw: &'a str) -> Result<Self, AuthError> {
        let header = decode_header(raw).map_err(|e| AuthError::TokenMalformed {
            reason: format!("Invalid header: {e}"),
        })?;

        Ok(Token {
            raw,
            header,
            claims: None,
            _state: PhantomData,
        })
    }

    /// Get the key ID from the token header
    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    /// Get the algorithm from the token header
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.header.alg
    }

    /// Read the `iss` claim without verifying anything, to pick the key set.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenMalformed`] if the payload is not base64url JSON or
    /// carries no issuer.
    pub fn unverified_issuer(&self) -> Result<String, AuthError> {
        let payload = self
            .raw
            .split('.')
            .nth(1)
            .ok_or_else(|| AuthError::TokenMalformed {
                reason: "Missing payload segment".to_string(),
            })?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthError::TokenMalformed {
                reason: "Payload is not base64url".to_string(),
            })?;
        let claims: UnverifiedIssuer =
            serde_json::from_slice(&bytes).map_err(|_| AuthError::TokenMalformed {
                reason: "Payload is not a JSON object".to_string(),
            })?;
        claims.iss.ok_or_else(|| AuthError::TokenMalformed {
            reason: "Missing iss claim".to_string(),
        })
    }

    /// Validate the token signature using the issuer's key cache
    ///
    /// # Errors
    ///
    /// Fails if the algorithm is not allowed, the key is unknown, or the
    /// signature does not verify.
    pub async fn validate_signature(
        self,
        cache: &JwkCache,
    ) -> Result<Token<'a, SignatureValidated>, AuthError> {
        if !ALLOWED_ALGORITHMS.contains(&self.header.alg) {
            return Err(AuthError::TokenMalformed {
                reason: format!("Algorithm {:?} not allowed", self.header.alg),
            });
        }

        let kid = self.kid().ok_or_else(|| AuthError::TokenMalformed {
            reason: "Missing kid in header".to_string(),
        })?;

        let key = cache.get_key(kid).await?;
        if key.algorithm.is_some_and(|pinned| pinned != self.header.alg) {
            return Err(AuthError::TokenInvalid);
        }

        // Signature only; time claims are checked in the next state
        let mut validation = Validation::new(self.header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let token_data = decode::<Claims>(self.raw, &key.key, &validation)?;

        Ok(Token {
            raw: self.raw,
            header: self.header,
            claims: Some(token_data.claims),
            _state: PhantomData,
        })
    }
}

impl<'a> Token<'a, SignatureValidated> {
    /// Validate time claims and transition to fully validated state
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenExpired`] or [`AuthError::TokenNotYetValid`] outside
    /// the validity window widened by `leeway_seconds`, and
    /// [`AuthError::TokenInvalid`] if the verified issuer differs from
    /// `expected_issuer`.
    pub fn validate_claims(
        self,
        expected_issuer: &str,
        leeway_seconds: u64,
    ) -> Result<Token<'a, Validated>, AuthError> {
        let claims = self.claims.as_ref().ok_or_else(|| AuthError::TokenMalformed {
            reason: "Claims not available".to_string(),
        })?;

        let now = chrono::Utc::now().timestamp();
        let leeway = i64::try_from(leeway_seconds).unwrap_or(i64::MAX);

        if claims.exp.saturating_add(leeway) < now {
            return Err(AuthError::TokenExpired);
        }

        if claims.nbf.is_some_and(|nbf| nbf.saturating_sub(leeway) > now) {
            return Err(AuthError::TokenNotYetValid);
        }

        if claims.iss != expected_issuer {
            return Err(AuthError::TokenInvalid);
        }

        Ok(Token {
            raw: self.raw,
            header: self.header,
            claims: self.claims,
            _state: PhantomData,
        })
    }
}

impl Token<'_, Validated> {
    /// Take the claims - only available on fully validated tokens
    #[must_use]
    pub fn into_claims(self) -> Claims {
        self.claims.unwrap_or_default()
    }
}

// Common methods for all states
impl<S: TokenState> Token<'_, S> {
    /// Get the current state name
    #[must_use]
    pub fn state_name(&self) -> &'static str {
        S::state_name()
    }
}
