//! Binary behaviour

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn help_lists_download_options() {
    Command::cargo_bin("inat-downloader")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--observations"))
        .stdout(predicate::str::contains("--species-file"))
        .stdout(predicate::str::contains("--resume"));
}

#[test]
fn missing_species_file_fails() {
    let dir = TempDir::new().unwrap();

    Command::cargo_bin("inat-downloader")
        .unwrap()
        .current_dir(dir.path())
        .args(["--species-file", "missing.csv"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("species file not found"));

    // Nothing is created before the configuration is known to be good
    assert!(!dir.path().join("results").exists());
}

#[test]
fn invalid_size_is_rejected_by_the_parser() {
    Command::cargo_bin("inat-downloader")
        .unwrap()
        .args(["--size", "gigantic"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid image size"));
}

#[tokio::test(flavor = "multi_thread")]
async fn run_against_mock_api_prints_json_summary() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/observations"))
        .and(query_param("taxon_name", "Apis mellifera"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"total_results": 0, "results": []})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("species.csv"), "name,start_id\nApis mellifera,0\n").unwrap();

    let base_url = server.uri();
    let workdir = dir.path().to_path_buf();
    let assert = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("inat-downloader")
            .unwrap()
            .current_dir(&workdir)
            .env("RUST_LOG", "off")
            .args([
                "--output-format",
                "json",
                "--inter-page-delay-ms",
                "0",
                "--api-base-url",
                &base_url,
            ])
            .assert()
    })
    .await
    .unwrap();

    assert
        .success()
        .stdout(predicate::str::contains("\"species\":\"Apis mellifera\""))
        .stdout(predicate::str::contains("\"success\":true"));

    assert!(dir.path().join("results/Apis_mellifera_metadata.csv").exists());
    assert!(dir.path().join("results/.resume/inat_resume.json").exists());
}

#[test]
fn square_is_not_a_download_size() {
    Command::cargo_bin("inat-downloader")
        .unwrap()
        .args(["--size", "square"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Valid options: small, medium, large, original"));
}
