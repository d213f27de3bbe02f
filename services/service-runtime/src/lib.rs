//! Service Runtime - runtime substrate for generated gRPC and REST handlers.
//!
//! This crate provides what generated service code runs on: hook-resolved
//! server and dial options, startup resolution of per-endpoint JWT
//! authorization rules against shared authenticators, the per-call
//! interceptor chain with panic recovery, and listeners with a
//! start/graceful-stop/stop lifecycle.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authrules;
pub mod config;
pub mod dispatch;
pub mod downstream;
pub mod error;
pub mod hooks;
pub mod jwt;
pub mod middleware;
pub mod observability;
pub mod runtime;
pub mod server;
pub mod shutdown;

pub use authrules::{Endpoint, EndpointRules, Rule};
pub use config::RuntimeConfig;
pub use dispatch::Dispatcher;
pub use downstream::dial;
pub use error::{AuthError, CallError, ErrorCode, ErrorMapper, ErrorResponse, RuntimeError};
pub use hooks::Hooks;
pub use middleware::{CallContext, Interceptor, InterceptorChain};
pub use runtime::ServiceRuntime;
pub use server::{ServerHandle, ServerState, StoppableServer};
pub use shutdown::Supervisor;
