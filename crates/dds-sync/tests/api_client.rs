//! Extract API client behavior against a mocked vendor endpoint

use dds_common::{ExtractType, WindowTime};
use dds_sync::api::ExtractApiClient;
use dds_sync::config::ApiConfig;
use dds_sync::error::ApiError;
use serde_json::json;
use std::str::FromStr;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(base_url: &str) -> ApiConfig {
    ApiConfig {
        base_url: base_url.to_string(),
        username: "svc-sync".to_string(),
        password: "secret".to_string(),
        timeout_secs: 5,
        max_retries: 2,
        part_concurrency: 2,
    }
}

async fn authenticated_client(server: &MockServer) -> ExtractApiClient {
    Mock::given(method("POST"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responseStatus": "SUCCESS",
            "sessionId": "session-123"
        })))
        .mount(server)
        .await;

    let mut client = ExtractApiClient::new(config(&server.uri())).expect("client");
    client.authenticate().await.expect("authenticate");
    client
}

#[tokio::test]
async fn test_rejected_credentials_are_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut client = ExtractApiClient::new(config(&server.uri())).expect("client");
    let result = client.authenticate().await;
    assert!(matches!(result, Err(ApiError::Authentication(_))));
}

#[tokio::test]
async fn test_vendor_failure_status_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responseStatus": "FAILURE",
            "errors": [{"type": "USERNAME_OR_PASSWORD_INCORRECT",
                        "message": "Authentication failed"}]
        })))
        .mount(&server)
        .await;

    let mut client = ExtractApiClient::new(config(&server.uri())).expect("client");
    let result = client.authenticate().await;
    match result {
        Err(ApiError::Authentication(message)) => {
            assert!(message.contains("Authentication failed"));
        },
        other => panic!("expected authentication error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_listing_sends_window_and_filters_placeholders() {
    let server = MockServer::start().await;
    let client = authenticated_client(&server).await;

    Mock::given(method("GET"))
        .and(path("/services/directdata/files"))
        .and(query_param("extract_type", "incremental_directdata"))
        .and(query_param("start_time", "2024-03-07T08:30Z"))
        .and(query_param("stop_time", "2024-03-07T08:45Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responseStatus": "SUCCESS",
            "data": [
                {"name": "real", "filename": "real.tar.gz", "size": 100,
                 "record_count": 1, "fileparts": 1, "filepart_details": []},
                {"name": "placeholder", "filename": "placeholder.tar.gz", "size": 0,
                 "record_count": 0, "fileparts": 0, "filepart_details": []}
            ],
            "responseDetails": {"total": 2}
        })))
        .mount(&server)
        .await;

    let descriptors = client
        .list_extract_files(
            ExtractType::Incremental,
            WindowTime::from_str("2024-03-07T08:30Z").expect("window"),
            WindowTime::from_str("2024-03-07T08:45Z").expect("window"),
        )
        .await
        .expect("listing");

    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].name, "real");
}

#[tokio::test]
async fn test_transient_server_error_is_retried() {
    let server = MockServer::start().await;
    let client = authenticated_client(&server).await;

    // First call fails with 503, the retry succeeds.
    Mock::given(method("GET"))
        .and(path("/services/directdata/files"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/services/directdata/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responseStatus": "SUCCESS",
            "data": []
        })))
        .mount(&server)
        .await;

    let descriptors = client
        .list_extract_files(
            ExtractType::Log,
            WindowTime::from_str("2024-03-06T00:00Z").expect("window"),
            WindowTime::from_str("2024-03-07T00:00Z").expect("window"),
        )
        .await
        .expect("retried listing");

    assert!(descriptors.is_empty());
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_call() {
    let server = MockServer::start().await;
    let client = authenticated_client(&server).await;

    Mock::given(method("GET"))
        .and(path("/services/directdata/files"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let result = client
        .list_extract_files(
            ExtractType::Log,
            WindowTime::from_str("2024-03-06T00:00Z").expect("window"),
            WindowTime::from_str("2024-03-07T00:00Z").expect("window"),
        )
        .await;

    assert!(matches!(
        result,
        Err(ApiError::RetriesExhausted { attempts: 2, .. })
    ));
}

#[tokio::test]
async fn test_forbidden_during_listing_is_fatal_not_retried() {
    let server = MockServer::start().await;
    let client = authenticated_client(&server).await;

    Mock::given(method("GET"))
        .and(path("/services/directdata/files"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let result = client
        .list_extract_files(
            ExtractType::Incremental,
            WindowTime::from_str("2024-03-07T08:30Z").expect("window"),
            WindowTime::from_str("2024-03-07T08:45Z").expect("window"),
        )
        .await;

    assert!(matches!(result, Err(ApiError::Authentication(_))));
}
