//! Configuration Module
//!
//! Host selection, credentials and connection settings for the client.

mod settings;

pub use settings::{
    ClientConfig, ConfigError, Credentials, Host, MOCK_REST_URL, MOCK_SOCKET_URL, REAL_REST_URL,
    REAL_SOCKET_URL, RestSettings, SOCKET_ENDPOINT, WebSocketSettings,
};
