//! Domain Layer - Core stream and market types.
//!
//! Pure types and helpers with no I/O: routing keys and payloads of the
//! real-time stream, subscription frames, and REST request tables.

/// Real-time frame routing keys and typed payloads.
pub mod realtime;

/// REG / REMOVE subscription frames.
pub mod subscription;

/// Market data request tables and date helpers.
pub mod market;
