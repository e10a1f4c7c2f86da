//! API Facade Integration Tests
//!
//! `KiwoomApi` wired to a wiremock REST server and an in-memory socket
//! connector.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use kiwoom_client::{
    ChartPeriod, ChartTarget, ClientConfig, ConnectionState, Connector, Credentials, Host,
    InboundSender, KiwoomApi, KiwoomError, Market, Transport, TransportError,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct NullTransport {
    closed: Mutex<bool>,
}

#[async_trait]
impl Transport for NullTransport {
    async fn send(&self, _text: String) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        *self.closed.lock() = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

#[derive(Default)]
struct RecordingConnector {
    tokens: Mutex<Vec<String>>,
    inbound: Mutex<Option<InboundSender>>,
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn connect(
        &self,
        _url: &str,
        token: &str,
        inbound: InboundSender,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        self.tokens.lock().push(token.to_string());
        *self.inbound.lock() = Some(inbound);
        Ok(Arc::new(NullTransport::default()))
    }
}

fn api(server: &MockServer) -> (KiwoomApi, Arc<RecordingConnector>) {
    let mut config = ClientConfig::new(
        Host::Mock,
        Credentials::new("app-key".to_string(), "secret-key".to_string()),
    );
    config.rest.request_interval = Duration::from_millis(1);
    let connector = Arc::new(RecordingConnector::default());
    let api = KiwoomApi::with_connector(
        &server.uri(),
        "ws://fake/api/dostk/websocket".to_string(),
        &config,
        Arc::clone(&connector) as Arc<dyn Connector>,
    )
    .unwrap();
    (api, connector)
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"token": "tok-1", "return_code": 0})),
        )
        .mount(server)
        .await;
}

async fn authenticated_api(server: &MockServer) -> KiwoomApi {
    mount_token(server).await;
    let (api, _) = api(server);
    api.rest().authenticate().await.unwrap();
    api
}

fn stock_list(codes: &[(&str, &str)]) -> Value {
    let list: Vec<Value> = codes
        .iter()
        .map(|(code, nxt)| json!({"code": code, "name": code, "nxtEnable": nxt}))
        .collect();
    json!({"list": list, "return_code": 0})
}

// =============================================================================
// Session
// =============================================================================

#[tokio::test]
async fn connect_issues_token_then_opens_stream() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    let (api, connector) = api(&server);

    api.connect().await.unwrap();

    assert_eq!(connector.tokens.lock().as_slice(), ["tok-1"]);
    assert_eq!(api.state(), ConnectionState::Connected);
    assert_eq!(api.token().as_deref(), Some("tok-1"));
}

#[tokio::test]
async fn connect_stops_when_token_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"return_code": 1, "return_msg": "bad key"})),
        )
        .mount(&server)
        .await;
    let (api, connector) = api(&server);

    let err = api.connect().await.unwrap_err();

    assert!(matches!(err, KiwoomError::Authentication(_)));
    assert!(connector.tokens.lock().is_empty());
    assert_eq!(api.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn close_revokes_token() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/oauth2/revoke"))
        .and(body_partial_json(json!({"token": "tok-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"return_code": 0})))
        .expect(1)
        .mount(&server)
        .await;
    let (api, _connector) = api(&server);
    api.connect().await.unwrap();

    api.close().await.unwrap();
    api.close().await.unwrap();

    assert_eq!(api.state(), ConnectionState::Disconnected);
    assert!(api.token().is_none());
}

#[tokio::test]
async fn failed_revocation_does_not_fail_close() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/oauth2/revoke"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let (api, _connector) = api(&server);
    api.connect().await.unwrap();

    api.close().await.unwrap();

    assert_eq!(api.state(), ConnectionState::Disconnected);
}

// =============================================================================
// Stock List
// =============================================================================

#[tokio::test]
async fn stock_list_returns_codes() {
    let server = MockServer::start().await;
    let api = authenticated_api(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/stkinfo"))
        .and(header("api-id", "ka10099"))
        .and(body_partial_json(json!({"mrkt_tp": "0"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(stock_list(&[("005930", "Y"), ("000020", "N")])),
        )
        .mount(&server)
        .await;

    let plain = api.stock_list(Market::Kospi, false).await.unwrap();
    let integrated = api.stock_list(Market::Kospi, true).await.unwrap();

    assert_eq!(plain, ["005930", "000020"]);
    assert_eq!(integrated, ["005930_AL", "000020"]);
}

#[tokio::test]
async fn nxt_list_merges_kospi_and_kosdaq() {
    let server = MockServer::start().await;
    let api = authenticated_api(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/stkinfo"))
        .and(body_partial_json(json!({"mrkt_tp": "0"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(stock_list(&[("005930", "Y"), ("000020", "N")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/stkinfo"))
        .and(body_partial_json(json!({"mrkt_tp": "10"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(stock_list(&[("247540", "Y"), ("000250", "Y"), ("900100", "N")])),
        )
        .mount(&server)
        .await;

    let codes = api.stock_list(Market::Nxt, false).await.unwrap();

    assert_eq!(codes, ["000250_AL", "005930_AL", "247540_AL"]);
}

#[tokio::test]
async fn stock_list_rejects_near_empty_market() {
    let server = MockServer::start().await;
    let api = authenticated_api(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/stkinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stock_list(&[("000001", "N")])))
        .mount(&server)
        .await;

    let err = api.stock_list_raw("99").await.unwrap_err();

    assert!(matches!(err, KiwoomError::InvalidArgument(_)));
}

// =============================================================================
// Candles
// =============================================================================

#[tokio::test]
async fn daily_candles_page_back_to_start() {
    let server = MockServer::start().await;
    let api = authenticated_api(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/chart"))
        .and(header("api-id", "ka10081"))
        .and(header("cont-yn", "N"))
        .and(body_partial_json(json!({
            "stk_cd": "005930",
            "base_dt": "20240105",
            "upd_stkpc_tp": "1"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cont-yn", "Y")
                .insert_header("next-key", "p2")
                .set_body_json(json!({
                    "stk_cd": "005930",
                    "stk_dt_pole_chart_qry": [{"dt": "20240105"}, {"dt": "20240104"}]
                })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/chart"))
        .and(header("next-key", "p2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cont-yn", "Y")
                .insert_header("next-key", "p3")
                .set_body_json(json!({
                    "stk_cd": "005930",
                    "stk_dt_pole_chart_qry": [{"dt": "20240103"}, {"dt": "20240102"}]
                })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/chart"))
        .and(header("next-key", "p3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let body = api
        .candle(
            "005930",
            ChartPeriod::Day,
            ChartTarget::Stock,
            Some("20240103"),
            Some("20240105"),
        )
        .await
        .unwrap();

    let rows = body["stk_dt_pole_chart_qry"].as_array().unwrap();
    assert_eq!(rows.len(), 4);
}

#[tokio::test]
async fn minute_sector_candles_without_start_page_until_server_stops() {
    let server = MockServer::start().await;
    let api = authenticated_api(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/chart"))
        .and(header("api-id", "ka20005"))
        .and(header("cont-yn", "N"))
        .and(body_partial_json(json!({"inds_cd": "001", "tic_scope": "1"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cont-yn", "Y")
                .insert_header("next-key", "p2")
                .set_body_json(json!({"inds_min_pole_qry": [{"cntr_tm": "20240105090100"}]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/chart"))
        .and(header("next-key", "p2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cont-yn", "N")
                .set_body_json(json!({"inds_min_pole_qry": [{"cntr_tm": "20240105090000"}]})),
        )
        .mount(&server)
        .await;

    let body = api
        .candle("001", ChartPeriod::Minute, ChartTarget::Sector, None, None)
        .await
        .unwrap();

    assert_eq!(body["inds_min_pole_qry"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn candle_rejects_malformed_dates() {
    let server = MockServer::start().await;
    let api = authenticated_api(&server).await;

    let err = api
        .candle(
            "005930",
            ChartPeriod::Day,
            ChartTarget::Stock,
            Some("2024-01-03"),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, KiwoomError::InvalidArgument(_)));
}

// =============================================================================
// Trade History
// =============================================================================

#[tokio::test]
async fn trade_requests_each_business_day_and_tags_rows() {
    let server = MockServer::start().await;
    let api = authenticated_api(&server).await;
    for (day, order) in [("20240105", "A1"), ("20240108", "B1")] {
        Mock::given(method("POST"))
            .and(path("/api/dostk/acnt"))
            .and(header("api-id", "kt00009"))
            .and(body_partial_json(json!({"ord_dt": day, "qry_tp": "1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "acnt_ord_cntr_prst_array": [{"ord_no": order}]
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let today = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
    let records = api.trade_as_of("20240105", None, today).await.unwrap();

    assert_eq!(
        records,
        [
            json!({"ord_no": "A1", "ord_dt": "2024-01-05"}),
            json!({"ord_no": "B1", "ord_dt": "2024-01-08"}),
        ]
    );
}

#[tokio::test]
async fn trade_rejects_malformed_start() {
    let server = MockServer::start().await;
    let api = authenticated_api(&server).await;

    let err = api.trade("2024/01/05", None).await.unwrap_err();

    assert!(matches!(err, KiwoomError::InvalidArgument(_)));
}
