//! Port Interfaces
//!
//! Defines the interfaces (ports) between the client core and the outside
//! world, following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Connector` / `Transport`: open and drive the real-time socket
//! - `TokenSource`: the access token the socket logs in with
//! - `RestPort`: single-call and paged REST requests

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

// =============================================================================
// Transport
// =============================================================================

/// Errors raised by a socket transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Opening the connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The transport is already closed.
    #[error("connection closed")]
    Closed,
}

/// Sending half of the inbound frame queue.
///
/// The transport's receive side pushes every text frame here in arrival order
/// and drops it when the connection ends, which ends the session.
pub type InboundSender = mpsc::UnboundedSender<String>;

/// Receiving half of the inbound frame queue.
pub type InboundReceiver = mpsc::UnboundedReceiver<String>;

/// An open real-time connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one text frame verbatim.
    async fn send(&self, text: String) -> Result<(), TransportError>;

    /// Close the connection. Closing an already closed transport succeeds.
    async fn close(&self) -> Result<(), TransportError>;

    /// Whether `close` has been called or the peer went away.
    fn is_closed(&self) -> bool;
}

/// Opens real-time connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url`, log in with `token`, and forward inbound frames.
    async fn connect(
        &self,
        url: &str,
        token: &str,
        inbound: InboundSender,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Supplies the access token used to open the socket.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Current token, if one has been issued.
    async fn token(&self) -> Option<String>;
}

// =============================================================================
// REST
// =============================================================================

/// Errors raised by the REST engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RestError {
    /// Token issuance failed or no token is held.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network failure.
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Body was not valid JSON.
    #[error("JSON parsing error: {0}")]
    JsonParse(String),

    /// The API reported a non-zero `return_code`.
    #[error("API error {code}: {message}")]
    Api {
        /// `return_code` value.
        code: i64,
        /// `return_msg` value.
        message: String,
    },
}

/// One page of a REST response.
#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    /// Decoded JSON body.
    pub body: Value,
    /// Server reports more pages (`cont-yn: Y`).
    pub has_more: bool,
    /// Continuation key for the next page.
    pub next_key: String,
}

impl RestResponse {
    /// Whether another page can be requested.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.has_more && !self.next_key.is_empty()
    }
}

/// Predicate deciding whether to fetch the page after `body`.
pub type ContinuePredicate<'a> = &'a (dyn Fn(&Value) -> bool + Send + Sync);

/// Single-call and paged REST requests.
#[async_trait]
pub trait RestPort: Send + Sync {
    /// Issue one request, continuing from `next_key` when given.
    async fn request_page(
        &self,
        endpoint: &str,
        api_id: &str,
        data: &Map<String, Value>,
        next_key: Option<&str>,
    ) -> Result<RestResponse, RestError>;

    /// Issue one request.
    async fn request(
        &self,
        endpoint: &str,
        api_id: &str,
        data: &Map<String, Value>,
    ) -> Result<RestResponse, RestError> {
        self.request_page(endpoint, api_id, data, None).await
    }

    /// Page through results while the server has more and `should_continue`
    /// accepts the latest page; returns the merged body.
    async fn request_until(
        &self,
        should_continue: ContinuePredicate<'_>,
        endpoint: &str,
        api_id: &str,
        data: &Map<String, Value>,
    ) -> Result<Value, RestError> {
        let first = self.request_page(endpoint, api_id, data, None).await?;
        let mut proceed = first.has_next() && should_continue(&first.body);
        let mut next_key = first.next_key;
        let mut merged = first.body;

        while proceed {
            let page = self
                .request_page(endpoint, api_id, data, Some(&next_key))
                .await?;
            proceed = page.has_next() && should_continue(&page.body);
            next_key = page.next_key;
            merge_page(&mut merged, page.body);
        }

        Ok(merged)
    }
}

/// Fold a later page into the merged body.
///
/// List fields are concatenated; other fields keep their first value.
pub fn merge_page(merged: &mut Value, page: Value) {
    let (Value::Object(acc), Value::Object(page)) = (merged, page) else {
        return;
    };

    for (key, value) in page {
        match (acc.get_mut(&key), value) {
            (Some(Value::Array(rows)), Value::Array(more)) => rows.extend(more),
            (None, value) => {
                acc.insert(key, value);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    struct ScriptedRest {
        pages: Mutex<VecDeque<RestResponse>>,
        keys_seen: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedRest {
        fn new(pages: Vec<RestResponse>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                keys_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RestPort for ScriptedRest {
        async fn request_page(
            &self,
            _endpoint: &str,
            _api_id: &str,
            _data: &Map<String, Value>,
            next_key: Option<&str>,
        ) -> Result<RestResponse, RestError> {
            self.keys_seen.lock().push(next_key.map(ToString::to_string));
            self.pages
                .lock()
                .pop_front()
                .ok_or_else(|| RestError::Network("no more pages".to_string()))
        }
    }

    fn page(rows: &[i64], next_key: &str) -> RestResponse {
        RestResponse {
            body: json!({"rows": rows, "return_code": 0}),
            has_more: !next_key.is_empty(),
            next_key: next_key.to_string(),
        }
    }

    #[test]
    fn merge_concatenates_lists_and_keeps_scalars() {
        let mut merged = json!({"rows": [1], "return_code": 0});
        merge_page(&mut merged, json!({"rows": [2, 3], "return_code": 5, "extra": "x"}));
        assert_eq!(merged, json!({"rows": [1, 2, 3], "return_code": 0, "extra": "x"}));
    }

    #[tokio::test]
    async fn request_until_follows_next_key() {
        let rest = ScriptedRest::new(vec![page(&[1, 2], "k1"), page(&[3], "k2"), page(&[4], "")]);

        let body = rest
            .request_until(&|_| true, "/api", "ka00000", &Map::new())
            .await
            .unwrap();

        assert_eq!(body["rows"], json!([1, 2, 3, 4]));
        assert_eq!(
            *rest.keys_seen.lock(),
            vec![None, Some("k1".to_string()), Some("k2".to_string())]
        );
    }

    #[tokio::test]
    async fn request_until_stops_when_predicate_rejects() {
        let rest = ScriptedRest::new(vec![page(&[1], "k1"), page(&[2], "k2"), page(&[3], "")]);

        let body = rest
            .request_until(
                &|body: &Value| body["rows"][0].as_i64() != Some(2),
                "/api",
                "ka00000",
                &Map::new(),
            )
            .await
            .unwrap();

        assert_eq!(body["rows"], json!([1, 2]));
        assert_eq!(rest.keys_seen.lock().len(), 2);
    }
}
