//! Observability Module
//!
//! Provides structured logging setup and Prometheus metrics.

pub mod logging;
pub mod metrics;

pub use logging::{build_dispatch, init_logging};
pub use metrics::RuntimeMetrics;
