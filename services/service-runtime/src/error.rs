//! Error handling module with type-safe, non-exhaustive error types
//!
//! Errors are split by when they can happen:
//! - [`RuntimeError`] aborts startup before any socket is opened
//! - [`AuthError`] describes why a bearer token was not accepted
//! - [`CallError`] is raised while serving a single call and is always
//!   rendered as a well-formed rejection through [`ErrorResponse`]
//!
//! Messages that reach a caller are sanitized so that configuration and
//! credential details never leak.

use crate::config::ConfigError;
use crate::middleware::CallContext;
use crate::server::ServerState;
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tonic::{Code, Status};
use uuid::Uuid;

/// Sensitive patterns that should be sanitized from error messages
const SENSITIVE_PATTERNS: &[&str] = &[
    "password",
    "secret",
    "token",
    "key",
    "credential",
    "bearer",
    "authorization",
    "api_key",
    "apikey",
    "private",
    "jwks",
];

/// Startup errors. None of these can occur once a listener is serving.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Both the additive and the override form of a customization point were set
    #[error("Hooks.{additive} and Hooks.{override_} cannot both be set")]
    ConfigurationConflict {
        /// Name of the additive hook field
        additive: &'static str,
        /// Name of the override hook field
        override_: &'static str,
    },

    /// The rule expression of an endpoint could not be compiled
    #[error("invalid authorization rule for endpoint {endpoint} ({expression:?}): {reason}")]
    RuleExpressionInvalid {
        /// Endpoint that declared the rule
        endpoint: String,
        /// Source text of the rule expression
        expression: String,
        /// Compiler diagnostic
        reason: String,
    },

    /// A rule was declared but no JWT authentication block is configured
    #[error(
        "method/endpoint {endpoint} requires a JWT-based authorization rule, but there is no config for library.authentication.jwtauth"
    )]
    AuthenticationConfigMissing {
        /// Endpoint that declared the rule
        endpoint: String,
    },

    /// The authenticator could not be constructed (initial JWKS fetch failed)
    #[error("authenticator unavailable for issuer {issuer}: {reason}")]
    AuthenticatorUnavailable {
        /// Issuer whose key set could not be loaded
        issuer: String,
        /// Description of the failure
        reason: String,
    },

    /// The listener address could not be bound
    #[error("failed to bind {address}: {source}")]
    ListenerBindFailure {
        /// Address that was requested
        address: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A lifecycle operation was requested in a state that does not allow it
    #[error("server {name} cannot {operation} while {state}")]
    InvalidState {
        /// Server name
        name: String,
        /// Requested operation
        operation: &'static str,
        /// Current state
        state: ServerState,
    },

    /// TLS material could not be loaded
    #[error("TLS configuration error: {reason}")]
    Tls {
        /// Description of the failure
        reason: String,
    },

    /// A resolved option could not be applied
    #[error("invalid option {option}: {reason}")]
    InvalidOption {
        /// Option name
        option: &'static str,
        /// Description of the failure
        reason: String,
    },

    /// A required section of the configuration is absent
    #[error("missing configuration section: {section}")]
    MissingSection {
        /// Dotted path of the section
        section: String,
    },

    /// Configuration failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A listener failed while serving
    #[error("server {name} failed: {reason}")]
    Serve {
        /// Server name
        name: String,
        /// Description of the failure
        reason: String,
    },

    /// Metrics registration failed
    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Reasons a bearer token was rejected.
///
/// `Clone` so that a single in-flight key set fetch can hand the same
/// failure to every waiter.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No token was found in any of the configured headers
    #[error("Token missing from request")]
    TokenMissing,

    /// Token structure is malformed
    #[error("Token malformed: {reason}")]
    TokenMalformed {
        /// Description of the malformation
        reason: String,
    },

    /// Token signature verification failed
    #[error("Token signature invalid")]
    TokenInvalid,

    /// Token has expired
    #[error("Token expired")]
    TokenExpired,

    /// Token is not yet valid (nbf claim)
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// The token's issuer is not configured
    #[error("Unknown issuer: {issuer}")]
    UnknownIssuer {
        /// Issuer claimed by the token
        issuer: String,
    },

    /// No key with the token's key id is known for the issuer
    #[error("Unknown key id: {kid}")]
    UnknownKey {
        /// Key id from the token header
        kid: String,
    },

    /// The issuer's key set could not be fetched
    #[error("Key set unavailable for {issuer}: {reason}")]
    KeySetUnavailable {
        /// Issuer whose key set failed
        issuer: String,
        /// Description of the failure
        reason: String,
    },
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            ErrorKind::ImmatureSignature => Self::TokenNotYetValid,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey => Self::TokenInvalid,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::MissingAlgorithm => Self::TokenMalformed {
                reason: sanitize_message(&err.to_string()),
            },
            _ => Self::TokenMalformed {
                reason: "Token validation failed".to_string(),
            },
        }
    }
}

/// Errors raised while serving a single call.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CallError {
    /// The caller did not present an acceptable token
    #[error("unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),

    /// The caller's claims do not satisfy the endpoint rule
    #[error("caller is not authorized for {endpoint}")]
    Unauthorized {
        /// Endpoint that rejected the call
        endpoint: String,
    },

    /// The call deadline passed before the call completed
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The handler or an interceptor panicked
    #[error("Unexpected panic: {message}")]
    HandlerPanic {
        /// Panic payload, when it was a string
        message: String,
    },

    /// The handler returned an error
    #[error(transparent)]
    Handler(anyhow::Error),

    /// The runtime itself failed while handling the call
    #[error("internal error: {reason}")]
    Internal {
        /// Description of the failure
        reason: String,
    },
}

impl CallError {
    /// Get the error code for this error
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated(_) => ErrorCode::Unauthenticated,
            Self::Unauthorized { .. } => ErrorCode::PermissionDenied,
            Self::DeadlineExceeded => ErrorCode::DeadlineExceeded,
            Self::Handler(err) => err
                .downcast_ref::<Status>()
                .map_or(ErrorCode::Internal, |status| ErrorCode::from_grpc(status.code())),
            Self::HandlerPanic { .. } | Self::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// Build a panic error from a `catch_unwind` payload
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::HandlerPanic { message }
    }
}

/// Error codes for gRPC/API responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// No valid credentials were presented
    Unauthenticated,
    /// Credentials are valid but do not grant access
    PermissionDenied,
    /// The call ran out of time
    DeadlineExceeded,
    /// The request was rejected as invalid
    InvalidArgument,
    /// The requested entity does not exist
    NotFound,
    /// A dependency is temporarily unavailable
    Unavailable,
    /// Anything else
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NotFound => "NOT_FOUND",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Get the gRPC status code for this error
    #[must_use]
    pub const fn grpc_code(&self) -> Code {
        match self {
            Self::Unauthenticated => Code::Unauthenticated,
            Self::PermissionDenied => Code::PermissionDenied,
            Self::DeadlineExceeded => Code::DeadlineExceeded,
            Self::InvalidArgument => Code::InvalidArgument,
            Self::NotFound => Code::NotFound,
            Self::Unavailable => Code::Unavailable,
            Self::Internal => Code::Internal,
        }
    }

    /// Get the HTTP status for this error
    #[must_use]
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Self::InvalidArgument => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Closest error code for a gRPC status code
    #[must_use]
    pub const fn from_grpc(code: Code) -> Self {
        match code {
            Code::Unauthenticated => Self::Unauthenticated,
            Code::PermissionDenied => Self::PermissionDenied,
            Code::DeadlineExceeded => Self::DeadlineExceeded,
            Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
                Self::InvalidArgument
            }
            Code::NotFound => Self::NotFound,
            Code::Unavailable | Code::ResourceExhausted => Self::Unavailable,
            _ => Self::Internal,
        }
    }
}

/// Structured error response with correlation ID
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: ErrorCode,
    /// Human-readable message (sanitized)
    pub message: String,
    /// Correlation ID for tracing
    pub correlation_id: Uuid,
    /// Status produced by the handler itself, passed through unchanged
    pub status: Option<Status>,
}

#[derive(Serialize)]
struct HttpErrorBody<'a> {
    status: HttpErrorStatus<'a>,
    correlation_id: String,
}

#[derive(Serialize)]
struct HttpErrorStatus<'a> {
    code: &'a str,
    description: &'a str,
}

impl ErrorResponse {
    /// Create a new error response
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>, correlation_id: Uuid) -> Self {
        Self {
            code,
            message: sanitize_message(&message.into()),
            correlation_id,
            status: None,
        }
    }

    /// Default rendering of a call error
    #[must_use]
    pub fn from_call_error(error: &CallError, correlation_id: Uuid) -> Self {
        let message = match error {
            CallError::Unauthenticated(_) => "Authentication required".to_string(),
            CallError::Unauthorized { .. } => "Permission denied".to_string(),
            CallError::DeadlineExceeded => "Request timed out".to_string(),
            CallError::Handler(err) => {
                if let Some(status) = err.downcast_ref::<Status>() {
                    return Self {
                        code: ErrorCode::from_grpc(status.code()),
                        message: sanitize_message(status.message()),
                        correlation_id,
                        status: Some(status.clone()),
                    };
                }
                // Never expose internal error details
                "Internal error".to_string()
            }
            CallError::HandlerPanic { .. } | CallError::Internal { .. } => {
                "Internal error".to_string()
            }
        };

        Self {
            code: error.code(),
            message,
            correlation_id,
            status: None,
        }
    }

    /// Convert to gRPC Status
    #[must_use]
    pub fn to_status(&self) -> Status {
        if let Some(status) = &self.status {
            return status.clone();
        }
        let message = format!("{} [correlation_id: {}]", self.message, self.correlation_id);
        Status::new(self.code.grpc_code(), message)
    }

    /// JSON body used by HTTP transports
    #[must_use]
    pub fn to_json(&self) -> String {
        let body = HttpErrorBody {
            status: HttpErrorStatus {
                code: self.code.as_str(),
                description: &self.message,
            },
            correlation_id: self.correlation_id.to_string(),
        };
        serde_json::to_string(&body).unwrap_or_else(|_| {
            format!(
                r#"{{"status":{{"code":"{}","description":"Internal error"}}}}"#,
                self.code.as_str()
            )
        })
    }
}

/// Maps a call error to the response sent to the caller.
///
/// Returning `None` falls back to [`ErrorResponse::from_call_error`].
pub trait ErrorMapper: Send + Sync {
    /// Map `error`, raised while serving `ctx`
    fn map_error(&self, ctx: &CallContext, error: &CallError) -> Option<ErrorResponse>;
}

impl<F> ErrorMapper for F
where
    F: Fn(&CallContext, &CallError) -> Option<ErrorResponse> + Send + Sync,
{
    fn map_error(&self, ctx: &CallContext, error: &CallError) -> Option<ErrorResponse> {
        self(ctx, error)
    }
}

/// Apply an optional mapper, falling back to the default rendering
#[must_use]
pub fn map_call_error(
    mapper: Option<&dyn ErrorMapper>,
    ctx: &CallContext,
    error: &CallError,
) -> ErrorResponse {
    mapper
        .and_then(|mapper| mapper.map_error(ctx, error))
        .unwrap_or_else(|| ErrorResponse::from_call_error(error, ctx.correlation_id()))
}

/// Sanitize a message by removing sensitive information
#[must_use]
pub fn sanitize_message(message: &str) -> String {
    if contains_sensitive_info(message) {
        return "Request rejected".to_string();
    }
    message.to_string()
}

/// Check if a string contains sensitive information
#[must_use]
pub fn contains_sensitive_info(text: &str) -> bool {
    let lower = text.to_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}
