//! Kiwoom API Facade
//!
//! Wires the REST client and the stream client together and exposes the
//! market-data queries built on top of the REST engine.

use std::future::Future;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use serde_json::{Map, Value};

use super::callbacks::CallbackResult;
use super::rest::RestClient;
use super::socket::WebSocketConnector;
use super::stream::{ConnectionState, StreamClient};
use crate::application::ports::{Connector, RestPort, TokenSource};
use crate::domain::market::{
    self, CHART_ENDPOINT, ChartPeriod, ChartTarget, DATE_FORMAT, Market, TRADE_API_ID,
    TRADE_BODY_KEY, TRADE_ENDPOINT,
};
use crate::domain::subscription::{FeedTypes, Refresh};
use crate::error::KiwoomError;
use crate::infrastructure::config::ClientConfig;

/// Stock list endpoint.
pub const STOCK_LIST_ENDPOINT: &str = "/api/dostk/stkinfo";

/// `api-id` of the stock list query.
pub const STOCK_LIST_API_ID: &str = "ka10099";

/// REST and real-time access to one Kiwoom account.
#[derive(Debug)]
pub struct KiwoomApi {
    rest: Arc<RestClient>,
    stream: StreamClient,
}

impl KiwoomApi {
    /// Build a client for the configured host.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, KiwoomError> {
        let connector = Arc::new(WebSocketConnector::new(config.websocket.heartbeat_interval));
        Self::with_connector(
            config.host.rest_url(),
            config.host.socket_url(),
            config,
            connector,
        )
    }

    /// Build a client from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`KiwoomError::Configuration`] for a missing or unknown host
    /// or missing credentials.
    pub fn from_env() -> Result<Self, KiwoomError> {
        Self::new(&ClientConfig::from_env()?)
    }

    /// Build a client against explicit endpoints and socket connector.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_connector(
        rest_url: &str,
        socket_url: String,
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, KiwoomError> {
        let rest = Arc::new(RestClient::new(
            rest_url,
            config.credentials.clone(),
            config.rest.clone(),
        )?);
        let tokens: Arc<dyn TokenSource> = rest.clone();
        let stream = StreamClient::new(
            socket_url,
            connector,
            tokens,
            config.websocket.max_concurrency,
        );
        Ok(Self { rest, stream })
    }

    /// The REST client.
    #[must_use]
    pub fn rest(&self) -> &Arc<RestClient> {
        &self.rest
    }

    /// The stream client.
    #[must_use]
    pub const fn stream(&self) -> &StreamClient {
        &self.stream
    }

    /// Current access token.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.rest.current_token()
    }

    /// Log every REST request and response.
    pub fn set_debug(&self, debug: bool) {
        self.rest.set_debug(debug);
    }

    /// Stream connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.stream.state()
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Issue a token, then open the real-time stream.
    ///
    /// # Errors
    ///
    /// Returns [`KiwoomError::Authentication`] if the token cannot be issued,
    /// or the stream's connect error.
    pub async fn connect(&self) -> Result<(), KiwoomError> {
        self.rest.authenticate().await?;
        self.stream.connect().await
    }

    /// Close the stream and revoke the token. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the stream's close error; revocation failures are logged.
    pub async fn close(&self) -> Result<(), KiwoomError> {
        self.stream.close().await?;
        if let Err(e) = self.rest.revoke().await {
            tracing::warn!(error = %e, "Token revocation failed");
        }
        Ok(())
    }

    /// Wait for the stream session to end.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that ended the session, if any.
    pub async fn wait(&self) -> Result<(), KiwoomError> {
        self.stream.wait().await
    }

    // =========================================================================
    // Real-time
    // =========================================================================

    /// Register a synchronous handler for a routing key.
    pub fn add_callback<F>(&self, key: &str, handler: F)
    where
        F: Fn(&str) -> CallbackResult + Send + Sync + 'static,
    {
        self.stream.add_callback(key, handler);
    }

    /// Register an asynchronous handler for a routing key.
    pub fn add_async_callback<F, Fut>(&self, key: &str, handler: F)
    where
        F: Fn(Arc<str>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.stream.add_async_callback(key, handler);
    }

    /// Register trade ticks for up to 100 codes.
    ///
    /// # Errors
    ///
    /// Returns [`KiwoomError::InvalidArgument`] for more than 100 codes.
    pub async fn register_tick<S: AsRef<str> + Sync>(
        &self,
        grp_no: &str,
        codes: &[S],
        refresh: Refresh,
    ) -> Result<(), KiwoomError> {
        self.stream.register_tick(grp_no, codes, refresh).await
    }

    /// Register order-book depth for up to 100 codes.
    ///
    /// # Errors
    ///
    /// Returns [`KiwoomError::InvalidArgument`] for more than 100 codes.
    pub async fn register_order_book<S: AsRef<str> + Sync>(
        &self,
        grp_no: &str,
        codes: &[S],
        refresh: Refresh,
    ) -> Result<(), KiwoomError> {
        self.stream
            .register_order_book(grp_no, codes, refresh)
            .await
    }

    /// Clear feed types from a group.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be sent.
    pub async fn remove_subscription(
        &self,
        grp_no: &str,
        types: impl Into<FeedTypes> + Send,
    ) -> Result<(), KiwoomError> {
        self.stream.remove_subscription(grp_no, types).await
    }

    // =========================================================================
    // Market Data
    // =========================================================================

    /// Raw stock list body for a market code.
    ///
    /// # Errors
    ///
    /// Returns [`KiwoomError::InvalidArgument`] when the server lists at most
    /// one entry for the code.
    pub async fn stock_list_raw(&self, market_code: &str) -> Result<Value, KiwoomError> {
        let data: Map<String, Value> = [("mrkt_tp".to_string(), Value::from(market_code))]
            .into_iter()
            .collect();
        let response = self
            .rest
            .request(STOCK_LIST_ENDPOINT, STOCK_LIST_API_ID, &data)
            .await?;

        let listed = response
            .body
            .get("list")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        if listed <= 1 {
            return Err(KiwoomError::InvalidArgument(format!(
                "stock list is not available for market code {market_code}"
            )));
        }
        Ok(response.body)
    }

    /// Instrument codes of a market.
    ///
    /// With `integrated`, Nextrade-enabled codes carry the `_AL` suffix.
    /// [`Market::Nxt`] is the sorted set of integrated KOSPI and KOSDAQ codes.
    ///
    /// # Errors
    ///
    /// See [`KiwoomApi::stock_list_raw`].
    pub async fn stock_list(
        &self,
        market: Market,
        integrated: bool,
    ) -> Result<Vec<String>, KiwoomError> {
        if let Some(code) = market.code() {
            let body = self.stock_list_raw(code).await?;
            return Ok(market::stock_codes(&body, integrated));
        }

        let mut listed = Vec::with_capacity(2);
        for source in [Market::Kospi, Market::Kosdaq] {
            let Some(code) = source.code() else { continue };
            let body = self.stock_list_raw(code).await?;
            listed.push(market::stock_codes(&body, true));
        }
        let (kospi, kosdaq) = match listed.as_slice() {
            [kospi, kosdaq] => (kospi.as_slice(), kosdaq.as_slice()),
            _ => (&[][..], &[][..]),
        };
        Ok(market::nxt_codes(kospi, kosdaq))
    }

    /// Candle rows for a stock or sector, paging back to `start`.
    ///
    /// Daily charts are anchored at `end`, or today when absent.
    ///
    /// # Errors
    ///
    /// Returns [`KiwoomError::InvalidArgument`] for malformed dates, or the
    /// REST error of any page.
    pub async fn candle(
        &self,
        code: &str,
        period: ChartPeriod,
        target: ChartTarget,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Value, KiwoomError> {
        let start = start.filter(|s| !s.is_empty());
        let end = end.filter(|e| !e.is_empty());
        for date in start.iter().chain(end.iter()) {
            market::parse_date(date)?;
        }

        let today = Local::now().date_naive().format(DATE_FORMAT).to_string();
        let base_date = end.unwrap_or(&today);
        let data = market::chart_request(target, period, code, Some(base_date));
        let spec = market::chart_spec(target, period);

        let should_continue =
            move |body: &Value| market::should_continue_chart(body, target, period, start);
        let body = self
            .rest
            .request_until(&should_continue, CHART_ENDPOINT, spec.api_id, &data)
            .await?;
        Ok(body)
    }

    /// Account trade history between two `YYYYMMDD` dates, one request per
    /// business day. Each record gains an `ord_dt` field (`YYYY-MM-DD`).
    ///
    /// The range is clamped to the last 60 days and to today.
    ///
    /// # Errors
    ///
    /// Returns [`KiwoomError::InvalidArgument`] for malformed dates, or the
    /// REST error of any day.
    pub async fn trade(&self, start: &str, end: Option<&str>) -> Result<Vec<Value>, KiwoomError> {
        self.trade_as_of(start, end, Local::now().date_naive()).await
    }

    /// [`KiwoomApi::trade`] with an explicit current date.
    ///
    /// # Errors
    ///
    /// See [`KiwoomApi::trade`].
    pub async fn trade_as_of(
        &self,
        start: &str,
        end: Option<&str>,
        today: NaiveDate,
    ) -> Result<Vec<Value>, KiwoomError> {
        let (start, end) = market::trade_window(start, end, today)?;
        let mut records = Vec::new();

        for day in market::business_days(start, end) {
            let data = market::trade_request(day);
            let mut body = self
                .rest
                .request_until(&|_: &Value| true, TRADE_ENDPOINT, TRADE_API_ID, &data)
                .await?;

            let Some(Value::Array(rows)) = body.get_mut(TRADE_BODY_KEY).map(Value::take) else {
                continue;
            };
            let order_date = day.format("%Y-%m-%d").to_string();
            records.extend(rows.into_iter().map(|mut row| {
                if let Value::Object(fields) = &mut row {
                    fields.insert("ord_dt".to_string(), Value::from(order_date.as_str()));
                }
                row
            }));
        }

        tracing::debug!(records = records.len(), %start, %end, "Trade history fetched");
        Ok(records)
    }
}
