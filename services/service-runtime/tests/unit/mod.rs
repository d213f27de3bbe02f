//! Unit tests for the public API

mod config;
mod errors;
mod hooks;
mod supervisor;
