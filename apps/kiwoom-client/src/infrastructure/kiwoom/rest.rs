//! REST Client
//!
//! reqwest-based implementation of [`RestPort`] and [`TokenSource`].
//!
//! # Authentication
//!
//! `POST /oauth2/token` issues a bearer token for the app key pair;
//! `POST /oauth2/revoke` invalidates it.
//!
//! # Requests
//!
//! Every data request is a JSON `POST` carrying the `api-id` header. Paged
//! responses set `cont-yn: Y` and a `next-key` header that the following
//! request echoes back. Requests are spaced at least `request_interval`
//! apart to stay under the server's five-per-second limit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::application::ports::{RestError, RestPort, RestResponse, TokenSource};
use crate::infrastructure::config::{Credentials, RestSettings};
use crate::infrastructure::metrics;

/// Token issuance path.
pub const TOKEN_PATH: &str = "/oauth2/token";

/// Token revocation path.
pub const REVOKE_PATH: &str = "/oauth2/revoke";

const CONTENT_TYPE: &str = "application/json;charset=UTF-8";

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    appkey: &'a str,
    secretkey: &'a str,
}

#[derive(Serialize)]
struct RevokeRequest<'a> {
    appkey: &'a str,
    secretkey: &'a str,
    token: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    return_code: Option<i64>,
    #[serde(default)]
    return_msg: Option<String>,
}

/// Kiwoom REST client.
pub struct RestClient {
    base_url: String,
    credentials: Credentials,
    settings: RestSettings,
    client: Client,
    token: RwLock<Option<String>>,
    last_request: Mutex<Option<Instant>>,
    debug: AtomicBool,
}

impl RestClient {
    /// Create a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        credentials: Credentials,
        settings: RestSettings,
    ) -> Result<Self, RestError> {
        let client = Client::builder()
            .timeout(settings.total_timeout)
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| RestError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            debug: AtomicBool::new(settings.debug),
            settings,
            client,
            token: RwLock::new(None),
            last_request: Mutex::new(None),
        })
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Currently held token.
    #[must_use]
    pub fn current_token(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Toggle request / response logging.
    pub fn set_debug(&self, debug: bool) {
        self.debug.store(debug, Ordering::Relaxed);
    }

    fn debugging(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    /// Issue a token and keep it for later requests.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Authentication`] if the server rejects the key
    /// pair or omits the token.
    pub async fn authenticate(&self) -> Result<String, RestError> {
        let body = TokenRequest {
            grant_type: "client_credentials",
            appkey: self.credentials.appkey(),
            secretkey: self.credentials.secretkey(),
        };
        let response: TokenResponse = self.post_plain(TOKEN_PATH, &body).await?;

        if let Some(code) = response.return_code
            && code != 0
        {
            return Err(RestError::Authentication(format!(
                "token request failed with return code {code}: {}",
                response.return_msg.unwrap_or_default()
            )));
        }
        let token = response
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RestError::Authentication("token missing from response".to_string()))?;

        *self.token.write() = Some(token.clone());
        tracing::info!("Access token issued");
        Ok(token)
    }

    /// Revoke the held token, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the revocation request fails; the token is
    /// forgotten either way.
    pub async fn revoke(&self) -> Result<(), RestError> {
        let Some(token) = self.token.write().take() else {
            return Ok(());
        };
        let body = RevokeRequest {
            appkey: self.credentials.appkey(),
            secretkey: self.credentials.secretkey(),
            token: &token,
        };
        let _: Value = self.post_plain(REVOKE_PATH, &body).await?;
        tracing::info!("Access token revoked");
        Ok(())
    }

    async fn post_plain<B, T>(&self, path: &str, body: &B) -> Result<T, RestError>
    where
        B: Serialize + Sync,
        T: for<'de> Deserialize<'de>,
    {
        self.throttle().await;
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .json(body)
            .send()
            .await
            .map_err(|e| RestError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RestError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(RestError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        serde_json::from_str(&text).map_err(|e| RestError::JsonParse(e.to_string()))
    }

    /// Wait until `request_interval` has passed since the previous request.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.settings.request_interval {
                tokio::time::sleep(self.settings.request_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Minimum spacing between requests.
    #[must_use]
    pub const fn request_interval(&self) -> Duration {
        self.settings.request_interval
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .field("authenticated", &self.token.read().is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for RestClient {
    async fn token(&self) -> Option<String> {
        self.current_token()
    }
}

#[async_trait]
impl RestPort for RestClient {
    async fn request_page(
        &self,
        endpoint: &str,
        api_id: &str,
        data: &Map<String, Value>,
        next_key: Option<&str>,
    ) -> Result<RestResponse, RestError> {
        let token = self.current_token().ok_or_else(|| {
            RestError::Authentication("not connected: token is not available".to_string())
        })?;
        let cont_yn = if next_key.is_some() { "Y" } else { "N" };

        if self.debugging() {
            let body = serde_json::Value::Object(data.clone());
            tracing::debug!(endpoint, api_id, cont_yn, next_key, body = %body, "REST request");
        }

        self.throttle().await;
        metrics::record_rest_request(api_id);
        let response = self
            .client
            .post(format!("{}{endpoint}", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {token}"))
            .header("api-id", api_id)
            .header("cont-yn", cont_yn)
            .header("next-key", next_key.unwrap_or_default())
            .json(data)
            .send()
            .await
            .map_err(|e| RestError::Network(e.to_string()))?;

        let status = response.status();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .trim()
                .to_string()
        };
        let has_more = header("cont-yn").eq_ignore_ascii_case("Y");
        let next_key = header("next-key");

        let text = response
            .text()
            .await
            .map_err(|e| RestError::Network(e.to_string()))?;

        if self.debugging() {
            tracing::debug!(endpoint, api_id, status = status.as_u16(), has_more, next_key = %next_key, body = %text, "REST response");
        }

        if !status.is_success() {
            return Err(RestError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|e| RestError::JsonParse(e.to_string()))?;
        if let Some(code) = body.get("return_code").and_then(Value::as_i64)
            && code != 0
        {
            return Err(RestError::Api {
                code,
                message: body
                    .get("return_msg")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        Ok(RestResponse {
            body,
            has_more,
            next_key,
        })
    }
}
