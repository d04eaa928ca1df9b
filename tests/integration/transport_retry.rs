//! Integration tests for HTTP retry behavior
//!
//! Runs the transport against a local mock server and counts attempts.

use std::sync::Arc;
use std::time::Duration;

use inat_downloader::downloader::RetryPolicy;
use inat_downloader::fetcher::{HttpTransport, TransportError};
use inat_downloader::shutdown::ShutdownCoordinator;
use reqwest::Client;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport(max_attempts: u32) -> HttpTransport {
    HttpTransport::new(
        Arc::new(Client::new()),
        RetryPolicy::new(max_attempts).with_backoff_base(Duration::from_millis(5)),
    )
}

#[tokio::test]
async fn transient_status_is_retried_until_attempts_run_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/observations"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let url = format!("{}/v1/observations", server.uri());
    let err = transport(3)
        .get_json::<Value>(&url, &[], "test query")
        .await
        .unwrap_err();

    assert!(err.is_transient());
    match err {
        TransportError::Exhausted {
            attempts, reason, ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(reason, "service unavailable");
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn fatal_status_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/observations"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such taxon"))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/v1/observations", server.uri());
    let err = transport(5)
        .get_json::<Value>(&url, &[], "test query")
        .await
        .unwrap_err();

    assert!(!err.is_transient());
    assert_eq!(err.status(), Some(404));
    assert!(matches!(err, TransportError::Fatal { ref body, .. } if body == "no such taxon"));
}

#[tokio::test]
async fn rate_limit_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/observations"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/observations"))
        .and(query_param("id_above", "42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total_results": 0, "results": []})))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/v1/observations", server.uri());
    let body: Value = transport(3)
        .get_json(&url, &[("id_above", "42".to_string())], "test query")
        .await
        .unwrap();

    assert_eq!(body["total_results"], 0);
}

#[tokio::test]
async fn undecodable_body_fails_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/observations"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/v1/observations", server.uri());
    let err = transport(5)
        .get_json::<Value>(&url, &[], "test query")
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Decode { .. }));
}

#[tokio::test]
async fn photo_bytes_are_returned_verbatim() {
    let server = MockServer::start().await;
    let jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    Mock::given(method("GET"))
        .and(path("/photos/7/medium.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg.clone()))
        .mount(&server)
        .await;

    let url = format!("{}/photos/7/medium.jpg", server.uri());
    let bytes = transport(2).get_bytes(&url, "photo download").await.unwrap();
    assert_eq!(bytes.as_ref(), jpeg.as_slice());
}

#[tokio::test]
async fn stop_request_cuts_backoff_short() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let transport = HttpTransport::new(Arc::new(Client::new()), RetryPolicy::new(5))
        .with_shutdown(shutdown);

    let started = std::time::Instant::now();
    let err = transport
        .get_bytes(&format!("{}/photos/1/small.jpg", server.uri()), "photo download")
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(1));
}
