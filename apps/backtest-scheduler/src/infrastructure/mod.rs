//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Job event broadcast for status streams.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Simulation engine adapters.
pub mod engine;

/// Health check and metrics routes.
pub mod health;

/// HTTP API.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Job store adapters.
pub mod persistence;

/// Tracing subscriber setup.
pub mod telemetry;
