//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Host selection, credentials and connection settings.
pub mod config;

/// Kiwoom REST and real-time stream adapters.
pub mod kiwoom;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
