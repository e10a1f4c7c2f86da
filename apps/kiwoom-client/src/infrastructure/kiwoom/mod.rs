//! Kiwoom Adapters
//!
//! Implements the ports against the Kiwoom Securities API:
//!
//! - **REST**: token issuance and paged JSON requests (reqwest)
//! - **Socket**: WebSocket transport for the real-time stream (tokio-tungstenite)
//! - **Stream**: connection lifecycle, receive loop and callback dispatch
//! - **API**: facade combining both with market-data queries

pub mod api;
pub mod callbacks;
pub mod codec;
pub mod rest;
pub mod socket;
pub mod stream;

pub use api::{KiwoomApi, STOCK_LIST_API_ID, STOCK_LIST_ENDPOINT};
pub use callbacks::{Callback, CallbackError, CallbackRegistry, CallbackResult, TransportSlot};
pub use codec::{CodecError, RoutedFrame, decode_routing};
pub use rest::{REVOKE_PATH, RestClient, TOKEN_PATH};
pub use socket::{WebSocketConnector, WebSocketTransport};
pub use stream::{ConnectionState, StreamClient};
