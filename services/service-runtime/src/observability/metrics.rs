//! Runtime Metrics
//!
//! Provides Prometheus metrics for authorization decisions, call outcomes,
//! handler panics and key set fetches.

use prometheus::{CounterVec, Encoder, Gauge, HistogramVec, Opts, Registry, TextEncoder};
use std::time::Duration;

const NAMESPACE: &str = "service_runtime";

/// Metrics recorded by the runtime.
pub struct RuntimeMetrics {
    registry: Registry,
    /// Authorization decisions by endpoint and outcome
    pub authorization_decisions: CounterVec,
    /// Completed calls by method and status code
    pub calls: CounterVec,
    /// Call latency by method
    pub call_latency: HistogramVec,
    /// Calls currently being served
    pub active_calls: Gauge,
    /// Calls that panicked, by method
    pub handler_panics: CounterVec,
    /// Key set fetches by issuer and outcome
    pub jwks_fetches: CounterVec,
}

impl std::fmt::Debug for RuntimeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeMetrics").finish_non_exhaustive()
    }
}

impl RuntimeMetrics {
    /// Creates the metrics and registers them in `registry`
    ///
    /// # Errors
    ///
    /// Returns an error if a metric with the same name is already registered.
    pub fn new(registry: Registry) -> Result<Self, prometheus::Error> {
        let authorization_decisions = CounterVec::new(
            Opts::new("authorization_decisions_total", "Authorization decisions")
                .namespace(NAMESPACE),
            &["endpoint", "decision"],
        )?;
        registry.register(Box::new(authorization_decisions.clone()))?;

        let calls = CounterVec::new(
            Opts::new("calls_total", "Completed calls").namespace(NAMESPACE),
            &["method", "code"],
        )?;
        registry.register(Box::new(calls.clone()))?;

        let call_latency = HistogramVec::new(
            prometheus::HistogramOpts::new("call_latency_seconds", "Call latency in seconds")
                .namespace(NAMESPACE)
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
            &["method"],
        )?;
        registry.register(Box::new(call_latency.clone()))?;

        let active_calls = Gauge::with_opts(
            Opts::new("active_calls", "Calls currently being served").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(active_calls.clone()))?;

        let handler_panics = CounterVec::new(
            Opts::new("handler_panics_total", "Calls that panicked").namespace(NAMESPACE),
            &["method"],
        )?;
        registry.register(Box::new(handler_panics.clone()))?;

        let jwks_fetches = CounterVec::new(
            Opts::new("jwks_fetches_total", "Key set fetches").namespace(NAMESPACE),
            &["issuer", "outcome"],
        )?;
        registry.register(Box::new(jwks_fetches.clone()))?;

        Ok(Self {
            registry,
            authorization_decisions,
            calls,
            call_latency,
            active_calls,
            handler_panics,
            jwks_fetches,
        })
    }

    /// Registry the metrics live in
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Records an authorization decision
    pub fn record_authorization(&self, endpoint: &str, decision: &str) {
        self.authorization_decisions
            .with_label_values(&[endpoint, decision])
            .inc();
    }

    /// Records a completed call
    pub fn record_call(&self, method: &str, code: &str, latency: Duration) {
        self.calls.with_label_values(&[method, code]).inc();
        self.call_latency
            .with_label_values(&[method])
            .observe(latency.as_secs_f64());
    }

    /// Records a panic caught at the call boundary
    pub fn record_panic(&self, method: &str) {
        self.handler_panics.with_label_values(&[method]).inc();
    }

    /// Records a key set fetch
    pub fn record_jwks_fetch(&self, issuer: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.jwks_fetches.with_label_values(&[issuer, outcome]).inc();
    }

    /// Renders every metric in the Prometheus text format
    #[must_use]
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
