//! iNaturalist client and full engine runs against a mock API

use std::sync::Arc;
use std::time::Duration;

use inat_downloader::downloader::{CollectionJob, EngineConfig, FetchEngine, QuotaTracker, RetryPolicy};
use inat_downloader::fetcher::inat::InatClient;
use inat_downloader::fetcher::{FetcherError, PageFilters, PageRequest, RemoteCollection};
use inat_downloader::output::FileSink;
use inat_downloader::{Cursor, QualityGrade, SizeVariant};
use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> InatClient {
    InatClient::new(RetryPolicy::new(2).with_backoff_base(Duration::from_millis(5)))
        .with_base_url(server.uri())
}

fn observation(server: &MockServer, id: u64, login: &str) -> serde_json::Value {
    json!({
        "id": id,
        "taxon": {"name": "Danaus plexippus"},
        "license_code": "cc-by",
        "user": {"login": login},
        "quality_grade": "research",
        "observed_on": "2024-07-14",
        "geojson": {"type": "Point", "coordinates": [2.35, 48.85]},
        "photos": [
            {"id": id * 10, "url": format!("{}/photos/{id}/square.jpg", server.uri())}
        ]
    })
}

#[tokio::test]
async fn page_query_sends_cursor_and_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/observations"))
        .and(query_param("taxon_name", "Danaus plexippus"))
        .and(query_param("quality_grade", "any"))
        .and(query_param("license", "cc-by"))
        .and(query_param("photo_license", "cc-by"))
        .and(query_param("order_by", "id"))
        .and(query_param("order", "asc"))
        .and(query_param("id_above", "1000"))
        .and(query_param("per_page", "30"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_results": 57,
            "results": [observation(&server, 1001, "alice")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = PageRequest {
        collection_key: "Danaus plexippus".to_string(),
        cursor: Cursor(1000),
        page_size: 30,
        filters: PageFilters {
            quality: QualityGrade::Any,
            license: "cc-by".to_string(),
        },
    };
    let page = client(&server).query_page(&request).await.unwrap();

    assert_eq!(page.total_results, 57);
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0].id, 1001);
    assert_eq!(page.records[0].latitude, Some(48.85));
    assert_eq!(page.records[0].observer_login.as_deref(), Some("alice"));
}

#[tokio::test]
async fn malformed_page_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/observations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .mount(&server)
        .await;

    let request = PageRequest {
        collection_key: "Danaus plexippus".to_string(),
        cursor: Cursor::START,
        page_size: 1,
        filters: PageFilters::default(),
    };
    let err = client(&server).query_page(&request).await.unwrap_err();
    assert!(matches!(err, FetcherError::InvalidResponse(_)));
}

#[tokio::test]
async fn engine_writes_metadata_and_images() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/observations"))
        .and(query_param("per_page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_results": 2,
            "results": [observation(&server, 11, "alice")]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/observations"))
        .and(query_param("per_page", "2"))
        .and(query_param("id_above", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_results": 2,
            "results": [observation(&server, 11, "alice"), observation(&server, 12, "bob")]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/photos/11/medium.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 300]))
        .expect(1)
        .mount(&server)
        .await;
    // Photo 12 is gone; the observation is still recorded
    Mock::given(method("GET"))
        .and(path("/photos/12/medium.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let config = EngineConfig::default()
        .with_target_count(5)
        .with_size_variant(SizeVariant::Medium)
        .with_inter_page_delay(Duration::ZERO);
    let quota = Arc::new(QuotaTracker::new(config.quota.window_specs()));
    let engine = FetchEngine::new(Arc::new(client(&server)), quota, config);

    let dir = tempdir().unwrap();
    let mut sink = FileSink::create(dir.path(), "Danaus plexippus").unwrap();
    let report = engine
        .run_collection(
            CollectionJob::new("Danaus plexippus", Cursor::START),
            &mut sink,
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.progress.records, 2);
    assert_eq!(report.progress.media_files, 1);
    assert_eq!(report.progress.media_bytes, 300);
    assert_eq!(report.progress.failed_media, 1);
    assert_eq!(report.final_cursor, Cursor(12));

    let csv = std::fs::read_to_string(dir.path().join("Danaus_plexippus_metadata.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("species_name,observation_id"));
    assert_eq!(
        lines[1],
        "Danaus plexippus,11,cc-by,alice,research,2024-07-14,48.85,2.35"
    );

    let image = dir
        .path()
        .join("Danaus_plexippus_images")
        .join("Danaus-plexippus_alice_cc-by_11_0.jpeg");
    assert_eq!(std::fs::read(image).unwrap().len(), 300);
}
