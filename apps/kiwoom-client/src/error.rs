//! Client Error Taxonomy
//!
//! Every public operation returns [`KiwoomError`]. Module errors convert into
//! it so callers can match on one enum.

use crate::application::ports::{RestError, TransportError};
use crate::domain::market::MarketError;
use crate::domain::subscription::SubscriptionError;
use crate::infrastructure::config::ConfigError;
use crate::infrastructure::kiwoom::callbacks::CallbackError;
use crate::infrastructure::kiwoom::codec::CodecError;

/// Errors surfaced by the client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KiwoomError {
    /// Unknown host or invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// No token available, or token issuance was rejected.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// The LOGIN frame reported a non-zero status.
    #[error("login failed with return code {return_code}: {message}")]
    LoginFailure {
        /// `return_code` of the LOGIN frame.
        return_code: i64,
        /// `return_msg` of the LOGIN frame, or the raw frame.
        message: String,
    },

    /// Argument rejected before anything was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The receive loop failed and the session was closed.
    #[error("dispatch failure: {0}")]
    DispatchFailure(String),

    /// Socket transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// REST request failure.
    #[error("REST error: {0}")]
    Rest(RestError),

    /// Frame encoding failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<RestError> for KiwoomError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::Authentication(message) => Self::Authentication(message),
            other => Self::Rest(other),
        }
    }
}

impl From<SubscriptionError> for KiwoomError {
    fn from(err: SubscriptionError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl From<MarketError> for KiwoomError {
    fn from(err: MarketError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl From<CallbackError> for KiwoomError {
    fn from(err: CallbackError) -> Self {
        match err {
            CallbackError::LoginFailure {
                return_code,
                message,
            } => Self::LoginFailure {
                return_code,
                message,
            },
            CallbackError::Transport(e) => Self::Transport(e),
            other => Self::DispatchFailure(other.to_string()),
        }
    }
}

/// Result alias for client operations.
pub type Result<T, E = KiwoomError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_authentication_maps_to_authentication() {
        let err = KiwoomError::from(RestError::Authentication("no token".to_string()));
        assert!(matches!(err, KiwoomError::Authentication(msg) if msg == "no token"));

        let err = KiwoomError::from(RestError::Network("reset".to_string()));
        assert!(matches!(err, KiwoomError::Rest(RestError::Network(_))));
    }

    #[test]
    fn subscription_error_is_invalid_argument() {
        let err = KiwoomError::from(SubscriptionError::TooManyCodes(101));
        assert!(matches!(err, KiwoomError::InvalidArgument(msg) if msg.contains("101")));
    }

    #[test]
    fn login_failure_keeps_code() {
        let err = KiwoomError::from(CallbackError::LoginFailure {
            return_code: 1,
            message: "bad token".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "login failed with return code 1: bad token"
        );
    }
}
