#![allow(clippy::unwrap_used)]
// Integration tests for `DeviceClient` using wiremock.

use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use relayctl_api::{ApiSurface, DeviceClient, Error, RetryPolicy, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        unit: Duration::from_millis(10),
    }
}

async fn setup(surface: ApiSurface, retry: RetryPolicy) -> (MockServer, DeviceClient) {
    let server = MockServer::start().await;
    let client = DeviceClient::with_client(
        reqwest::Client::new(),
        Url::parse(&server.uri()).unwrap(),
        surface,
        retry,
        Duration::from_secs(5),
    );
    (server, client)
}

// ── REST surface ────────────────────────────────────────────────────

#[tokio::test]
async fn test_status() {
    let (server, client) = setup(ApiSurface::Rest, RetryPolicy::none()).await;

    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "relay1": true,
            "relay2": false,
            "feedback1": true,
            "feedback2": false,
            "error": false,
            "rssi": -61
        })))
        .mount(&server)
        .await;

    let status = client.status().await.unwrap();
    assert!(status.relay1);
    assert!(status.feedback1);
    assert_eq!(status.rssi, -61);
    assert_eq!(status.ip, None);
}

#[tokio::test]
async fn test_control_posts_json() {
    let (server, client) = setup(ApiSurface::Rest, RetryPolicy::none()).await;

    Mock::given(method("POST"))
        .and(path("/api/control"))
        .and(body_json(json!({ "relay": 2, "state": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let ack = client.control(2, true).await.unwrap();
    assert!(ack.success);
}

#[tokio::test]
async fn test_diagnostic() {
    let (server, client) = setup(ApiSurface::Rest, RetryPolicy::none()).await;

    Mock::given(method("GET"))
        .and(path("/api/diagnostic"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "relay1": { "output": true, "feedback": false, "match": false },
            "relay2": { "output": false, "feedback": false, "match": true }
        })))
        .mount(&server)
        .await;

    let diag = client.diagnostic().await.unwrap();
    assert!(!diag.relay1.matched);
    assert!(diag.relay2.matched);
}

#[tokio::test]
async fn test_probe_accepts_named_board() {
    let (server, client) = setup(ApiSurface::Rest, RetryPolicy::none()).await;

    Mock::given(method("GET"))
        .and(path("/api/discovery"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "name": "ESP32-S3 Relay", "ip": "" })),
        )
        .mount(&server)
        .await;

    assert!(client.probe("ESP32").await.unwrap());
}

#[tokio::test]
async fn test_probe_rejects_foreign_device() {
    let (server, client) = setup(ApiSurface::Rest, RetryPolicy::none()).await;

    Mock::given(method("GET"))
        .and(path("/api/discovery"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "printer" })))
        .mount(&server)
        .await;

    assert!(!client.probe("ESP32").await.unwrap());
}

// ── Legacy surface ──────────────────────────────────────────────────

#[tokio::test]
async fn test_legacy_control_sends_bearer_token() {
    let server = MockServer::start().await;
    let transport = TransportConfig {
        token: Some("s3cret".to_string().into()),
        ..TransportConfig::default()
    };
    let client = DeviceClient::new(
        Url::parse(&server.uri()).unwrap(),
        ApiSurface::Legacy,
        &transport,
        RetryPolicy::none(),
    )
    .unwrap();

    Mock::given(method("GET"))
        .and(path("/control"))
        .and(query_param("relay", "1"))
        .and(query_param("state", "true"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "feedback1": true,
            "feedback2": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ack = client.control(1, true).await.unwrap();
    assert!(ack.success);
    assert_eq!(ack.feedback1, Some(true));
}

#[tokio::test]
async fn test_legacy_probe_uses_status() {
    let (server, client) = setup(ApiSurface::Legacy, RetryPolicy::none()).await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "relay1": false })))
        .mount(&server)
        .await;

    assert!(client.probe("ESP32").await.unwrap());
}

// ── Error handling and retry ────────────────────────────────────────

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let (server, client) = setup(ApiSurface::Legacy, fast_retry()).await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.status().await;
    assert!(
        matches!(result, Err(Error::Unauthorized)),
        "expected Unauthorized, got: {result:?}"
    );
}

#[tokio::test]
async fn test_malformed_json_is_not_retried() {
    let (server, client) = setup(ApiSurface::Rest, fast_retry()).await;

    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.status().await;
    assert!(
        matches!(result, Err(Error::Deserialization { ref body, .. }) if body.contains("oops")),
        "expected Deserialization, got: {result:?}"
    );
}

#[tokio::test]
async fn test_server_error_retried_three_times() {
    let (server, client) = setup(ApiSurface::Rest, fast_retry()).await;

    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&server)
        .await;

    let result = client.status().await;
    match result {
        Err(Error::RetriesExhausted { attempts, last }) => {
            assert_eq!(attempts, 4);
            assert!(matches!(*last, Error::Status { status: 503, .. }));
        }
        other => panic!("expected RetriesExhausted, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_transient_failure_then_success() {
    let (server, client) = setup(ApiSurface::Rest, fast_retry()).await;

    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "relay2": true })))
        .mount(&server)
        .await;

    let status = client.status().await.unwrap();
    assert!(status.relay2);
}

#[tokio::test]
async fn test_timeout_maps_to_timeout_error() {
    let server = MockServer::start().await;
    let transport = TransportConfig {
        timeout: Duration::from_millis(100),
        token: None,
    };
    let client = DeviceClient::new(
        Url::parse(&server.uri()).unwrap(),
        ApiSurface::Rest,
        &transport,
        RetryPolicy::none(),
    )
    .unwrap();

    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let result = client.status().await;
    assert!(
        matches!(result, Err(Error::Timeout { timeout_ms: 100 })),
        "expected Timeout, got: {result:?}"
    );
}
