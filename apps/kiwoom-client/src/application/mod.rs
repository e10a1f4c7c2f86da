//! Application Layer - Port definitions.
//!
//! The interfaces the streaming core and API facade depend on, implemented
//! by the infrastructure adapters and by in-memory fakes in tests.

/// Port interfaces for the socket transport, token source and REST engine.
pub mod ports;
