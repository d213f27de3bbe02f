//! Call Middleware
//!
//! Per-call context, the interceptor chain and the Tower layer that runs it
//! at the call boundary.

pub mod chain;
pub mod context;
pub mod layer;
pub mod logger;
pub mod trace;

pub use chain::{CallResult, Interceptor, InterceptorChain, Next, compose};
pub use context::CallContext;
pub use layer::{CallResponder, GrpcResponder, InterceptorLayer, InterceptorService, JsonResponder};
pub use logger::LoggerInterceptor;
pub use trace::TraceIdInterceptor;
