//! REST Client Integration Tests
//!
//! Runs `RestClient` against a wiremock server standing in for the Kiwoom
//! REST API.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use kiwoom_client::infrastructure::config::RestSettings;
use kiwoom_client::{Credentials, RestClient, RestError, RestPort, TokenSource};
use serde_json::{Map, Value, json};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings() -> RestSettings {
    RestSettings {
        request_interval: Duration::from_millis(1),
        ..RestSettings::default()
    }
}

fn client(server: &MockServer) -> RestClient {
    RestClient::new(
        server.uri(),
        Credentials::new("app-key".to_string(), "secret-key".to_string()),
        settings(),
    )
    .unwrap()
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "expires_dt": "20991231235959",
            "token_type": "bearer",
            "token": "tok-123",
            "return_code": 0,
            "return_msg": "ok"
        })))
        .mount(server)
        .await;
}

async fn authenticated(server: &MockServer) -> RestClient {
    mount_token(server).await;
    let client = client(server);
    client.authenticate().await.unwrap();
    client
}

fn body(pairs: &[(&str, &str)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), Value::from(*v)))
        .collect()
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn authenticate_sends_key_pair_and_stores_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_json(json!({
            "grant_type": "client_credentials",
            "appkey": "app-key",
            "secretkey": "secret-key"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "tok-123",
            "return_code": 0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let token = client.authenticate().await.unwrap();

    assert_eq!(token, "tok-123");
    assert_eq!(client.current_token().as_deref(), Some("tok-123"));
    assert_eq!(client.token().await.as_deref(), Some("tok-123"));
}

#[tokio::test]
async fn authenticate_rejects_non_zero_return_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "return_code": 3,
            "return_msg": "invalid appkey"
        })))
        .mount(&server)
        .await;

    let err = client(&server).authenticate().await.unwrap_err();

    match err {
        RestError::Authentication(message) => assert!(message.contains("invalid appkey")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn authenticate_requires_token_in_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"return_code": 0})))
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client.authenticate().await.unwrap_err();

    assert!(matches!(err, RestError::Authentication(_)));
    assert!(client.current_token().is_none());
}

#[tokio::test]
async fn revoke_forgets_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/revoke"))
        .and(body_json(json!({
            "appkey": "app-key",
            "secretkey": "secret-key",
            "token": "tok-123"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"return_code": 0})))
        .expect(1)
        .mount(&server)
        .await;
    let client = authenticated(&server).await;

    client.revoke().await.unwrap();
    client.revoke().await.unwrap();

    assert!(client.current_token().is_none());
}

// =============================================================================
// Requests
// =============================================================================

#[tokio::test]
async fn request_sends_protocol_headers() {
    let server = MockServer::start().await;
    let client = authenticated(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/stkinfo"))
        .and(header("authorization", "Bearer tok-123"))
        .and(header("api-id", "ka10099"))
        .and(header("cont-yn", "N"))
        .and(body_json(json!({"mrkt_tp": "0"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"list": [], "return_code": 0})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = client
        .request("/api/dostk/stkinfo", "ka10099", &body(&[("mrkt_tp", "0")]))
        .await
        .unwrap();

    assert!(!response.has_next());
    assert_eq!(response.body["list"], json!([]));
}

#[tokio::test]
async fn debug_mode_logs_and_still_sends_request() {
    let server = MockServer::start().await;
    let client = authenticated(&server).await;
    client.set_debug(true);
    Mock::given(method("POST"))
        .and(path("/api/dostk/stkinfo"))
        .and(body_json(json!({"mrkt_tp": "10"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"list": [], "return_code": 0})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = client
        .request("/api/dostk/stkinfo", "ka10099", &body(&[("mrkt_tp", "10")]))
        .await
        .unwrap();

    assert_eq!(response.body["return_code"], 0);
}

#[tokio::test]
async fn request_reports_continuation_headers() {
    let server = MockServer::start().await;
    let client = authenticated(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/chart"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cont-yn", "Y")
                .insert_header("next-key", "k-1")
                .set_body_json(json!({"rows": [1]})),
        )
        .mount(&server)
        .await;

    let response = client
        .request("/api/dostk/chart", "ka10081", &Map::new())
        .await
        .unwrap();

    assert!(response.has_more);
    assert_eq!(response.next_key, "k-1");
    assert!(response.has_next());
}

#[tokio::test]
async fn request_until_follows_next_key_and_merges_pages() {
    let server = MockServer::start().await;
    let client = authenticated(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/chart"))
        .and(header("cont-yn", "N"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cont-yn", "Y")
                .insert_header("next-key", "page-2")
                .set_body_json(json!({"stk_cd": "005930", "rows": [{"dt": "20240105"}]})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/chart"))
        .and(header("cont-yn", "Y"))
        .and(header("next-key", "page-2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cont-yn", "N")
                .set_body_json(json!({"stk_cd": "ignored", "rows": [{"dt": "20240104"}]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let merged = client
        .request_until(&|_: &Value| true, "/api/dostk/chart", "ka10081", &Map::new())
        .await
        .unwrap();

    assert_eq!(merged["stk_cd"], "005930");
    assert_eq!(
        merged["rows"],
        json!([{"dt": "20240105"}, {"dt": "20240104"}])
    );
}

#[tokio::test]
async fn request_until_stops_when_predicate_declines() {
    let server = MockServer::start().await;
    let client = authenticated(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/chart"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cont-yn", "Y")
                .insert_header("next-key", "more")
                .set_body_json(json!({"rows": [1]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let merged = client
        .request_until(&|_: &Value| false, "/api/dostk/chart", "ka10081", &Map::new())
        .await
        .unwrap();

    assert_eq!(merged["rows"], json!([1]));
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let server = MockServer::start().await;
    let client = authenticated(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/chart"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let err = client
        .request("/api/dostk/chart", "ka10081", &Map::new())
        .await
        .unwrap_err();

    match err {
        RestError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "upstream down");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn api_error_code_is_reported() {
    let server = MockServer::start().await;
    let client = authenticated(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/chart"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "return_code": 5,
            "return_msg": "rate limited"
        })))
        .mount(&server)
        .await;

    let err = client
        .request("/api/dostk/chart", "ka10081", &Map::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RestError::Api { code: 5, ref message } if message == "rate limited"));
}

#[tokio::test]
async fn invalid_json_is_reported() {
    let server = MockServer::start().await;
    let client = authenticated(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/chart"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = client
        .request("/api/dostk/chart", "ka10081", &Map::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RestError::JsonParse(_)));
}

#[tokio::test]
async fn unreachable_server_is_network_error() {
    let client = RestClient::new(
        "http://127.0.0.1:1",
        Credentials::new("k".to_string(), "s".to_string()),
        settings(),
    )
    .unwrap();

    let err = client.authenticate().await.unwrap_err();

    assert!(matches!(err, RestError::Network(_)));
}
