//! Per-call context

use http::HeaderMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Dispatch;
use uuid::Uuid;

/// Header carrying a caller supplied correlation id
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Header carrying the gRPC deadline
pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// What the runtime knows about one inbound call.
///
/// Built when the call enters the interceptor chain, enriched by
/// interceptors, and handed to the handler through the request extensions.
#[derive(Clone)]
pub struct CallContext {
    correlation_id: Uuid,
    method: String,
    headers: HeaderMap,
    deadline: Option<Instant>,
    trace_id: Option<String>,
    logger: Option<Dispatch>,
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("correlation_id", &self.correlation_id)
            .field("method", &self.method)
            .field("deadline", &self.deadline)
            .field("trace_id", &self.trace_id)
            .finish_non_exhaustive()
    }
}

impl CallContext {
    /// Context for `method` with the given request headers.
    ///
    /// The deadline is the earlier of the `grpc-timeout` header and
    /// `default_timeout`.
    #[must_use]
    pub fn new(method: impl Into<String>, headers: HeaderMap, default_timeout: Option<Duration>) -> Self {
        let now = Instant::now();
        let requested = headers
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_grpc_timeout);
        let timeout = match (requested, default_timeout) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let correlation_id = headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value).ok())
            .unwrap_or_else(Uuid::new_v4);

        Self {
            correlation_id,
            method: method.into(),
            headers,
            deadline: timeout.map(|timeout| now + timeout),
            trace_id: None,
            logger: None,
        }
    }

    /// Context for an HTTP request
    #[must_use]
    pub fn from_request<B>(request: &http::Request<B>, default_timeout: Option<Duration>) -> Self {
        Self::new(request.uri().path(), request.headers().clone(), default_timeout)
    }

    /// Correlation id reported in error responses
    #[must_use]
    pub const fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Method path, e.g. `/pkg.Service/Method` or `/v1/orders`
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request headers
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// When the call must be complete
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Trace id, once the trace interceptor has run
    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// Logger bound to this call, once the logger interceptor has run
    #[must_use]
    pub const fn logger(&self) -> Option<&Dispatch> {
        self.logger.as_ref()
    }

    /// Set the trace id
    pub fn set_trace_id(&mut self, trace_id: impl Into<String>) {
        self.trace_id = Some(trace_id.into());
    }

    /// Bind a logger
    pub fn set_logger(&mut self, logger: Dispatch) {
        self.logger = Some(logger);
    }

    /// Tighten the deadline; a later deadline than the current one is ignored
    pub fn shorten_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(self.deadline.map_or(deadline, |current| current.min(deadline)));
    }
}

/// Parse a `grpc-timeout` value: up to eight digits followed by a unit
/// (`H`, `M`, `S`, `m`, `u`, `n`).
#[must_use]
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if !value.is_ascii() {
        return None;
    }
    let (digits, unit) = value.split_at(value.len().checked_sub(1)?);
    if digits.is_empty() || digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    match unit {
        "H" => Some(Duration::from_secs(amount * 3600)),
        "M" => Some(Duration::from_secs(amount * 60)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}
