//! Property-Based Tests Module
//!
//! Uses proptest for invariant verification.
//!
//! Test categories:
//! - hook_resolution: additive/override customization points
//! - composition: interceptor ordering
//! - rule_expressions: rule language parsing and evaluation
//! - error_sanitization: sensitive data never leaks
//! - deadlines: `grpc-timeout` parsing and deadline selection

pub mod generators;
pub mod deadlines;
pub mod rule_expressions;
