#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Kiwoom Client - REST + Real-time Stream Client
//!
//! Client for the Kiwoom Securities REST API. Market data and trade history
//! are fetched over HTTP; quotes and order-book depth arrive over a single
//! persistent WebSocket stream and are routed to registered callbacks.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure stream and market types
//!   - `realtime`: Routing keys, REAL frame payloads
//!   - `subscription`: REG / REMOVE frames
//!   - `market`: Chart and trade request tables, date helpers
//!
//! - **Application**: Port definitions
//!   - `ports`: `Transport`, `Connector`, `TokenSource`, `RestPort`
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `kiwoom`: REST client, WebSocket transport, stream client, API facade
//!   - `config`: Host, credentials and settings from the environment
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: tracing subscriber with optional OTLP export
//!
//! # Data Flow
//!
//! ```text
//! WebSocket reader ──► inbound queue ──► dispatcher ──► routing key
//!                                                          │
//!                                      permit pool ◄── spawned callback
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core stream and market types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Crate-wide error type.
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{ChartPeriod, ChartTarget, Market, MarketError};
pub use domain::realtime::{FeedType, OrderBook, RealFrame, RealItem, Tick};
pub use domain::subscription::{FeedTypes, Refresh, SubscriptionError, SubscriptionRequest};

// Ports
pub use application::ports::{
    Connector, InboundSender, RestError, RestPort, RestResponse, TokenSource, Transport,
    TransportError,
};

// Errors
pub use error::{KiwoomError, Result};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError, Credentials, Host};

// Adapters
pub use infrastructure::kiwoom::{
    CallbackError, CallbackResult, ConnectionState, KiwoomApi, RestClient, StreamClient,
    WebSocketConnector,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
