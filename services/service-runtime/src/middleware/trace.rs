//! Trace-id injection
//!
//! Takes the trace id from `x-trace-id` or a W3C `traceparent` header, or
//! generates one, and runs the rest of the call inside a span carrying it.

use super::chain::{CallResult, Interceptor, Next};
use super::context::CallContext;
use async_trait::async_trait;
use tracing::{Instrument, info_span};
use uuid::Uuid;

/// Header carrying a plain trace id
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// W3C trace context header
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Last interceptor of every chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceIdInterceptor;

impl TraceIdInterceptor {
    /// Trace id for a call with these headers
    #[must_use]
    pub fn trace_id_for(headers: &http::HeaderMap) -> String {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        header(TRACE_ID_HEADER)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
            .or_else(|| header(TRACEPARENT_HEADER).and_then(parse_traceparent))
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string())
    }
}

/// Trace id of a `version-traceid-parentid-flags` header
fn parse_traceparent(value: &str) -> Option<String> {
    let mut parts = value.trim().split('-');
    let _version = parts.next()?;
    let trace_id = parts.next()?;
    let valid = trace_id.len() == 32
        && trace_id.bytes().all(|b| b.is_ascii_hexdigit())
        && trace_id.bytes().any(|b| b != b'0');
    valid.then(|| trace_id.to_ascii_lowercase())
}

#[async_trait]
impl Interceptor for TraceIdInterceptor {
    fn name(&self) -> &str {
        "trace_id"
    }

    async fn intercept(&self, mut ctx: CallContext, next: Next<'_>) -> CallResult {
        let trace_id = Self::trace_id_for(ctx.headers());
        let span = info_span!(
            "call",
            method = %ctx.method(),
            trace_id = %trace_id,
            correlation_id = %ctx.correlation_id()
        );
        ctx.set_trace_id(trace_id);
        next.run(ctx).instrument(span).await
    }
}
