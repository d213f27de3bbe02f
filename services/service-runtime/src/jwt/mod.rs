//! JWT verification: claims, key caches, typestate tokens and authenticators

pub mod authenticator;
pub mod claims;
pub mod http_client;
pub mod jwk_cache;
pub mod registry;
pub mod token;

pub use authenticator::Authenticator;
pub use claims::Claims;
pub use http_client::{HttpConfig, build_http_client};
pub use jwk_cache::{Jwk, JwkCache, Jwks};
pub use registry::AuthenticatorRegistry;
pub use token::{SignatureValidated, Token, TokenState, Unvalidated, Validated};
