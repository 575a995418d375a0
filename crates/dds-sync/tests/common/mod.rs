//! Shared fixtures for pipeline integration tests

use dds_sync::config::SyncConfig;
use dds_sync::cursor::MemoryCursorStore;
use dds_sync::dispatch::LocalDispatcher;
use dds_sync::lease::MemoryRunLease;
use dds_sync::storage::LocalStore;
use dds_sync::warehouse::MemoryWarehouse;
use dds_sync::Orchestrator;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub struct TestHarness {
    pub orchestrator: Orchestrator,
    pub store: Arc<LocalStore>,
    pub warehouse: Arc<MemoryWarehouse>,
    pub cursor: Arc<MemoryCursorStore>,
    _dir: tempfile::TempDir,
}

pub fn harness(api_base_url: &str) -> TestHarness {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(LocalStore::new(dir.path()));
    let warehouse = Arc::new(MemoryWarehouse::new());
    let cursor = Arc::new(MemoryCursorStore::new());

    let mut config = SyncConfig::default();
    config.api.base_url = api_base_url.to_string();
    config.api.username = "svc-sync".to_string();
    config.api.password = "secret".to_string();
    config.api.max_retries = 2;
    config.storage.bucket = "unused".to_string();

    let orchestrator = Orchestrator::new(
        config,
        store.clone(),
        warehouse.clone(),
        cursor.clone(),
        Arc::new(LocalDispatcher::new()),
        Arc::new(MemoryRunLease::new()),
    );

    TestHarness {
        orchestrator,
        store,
        warehouse,
        cursor,
        _dir: dir,
    }
}

/// Build a gzipped tar archive from (path, contents) pairs.
pub fn build_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (file_path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, file_path, *data)
            .expect("append member");
    }
    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip")
}

/// Split bytes into `parts` nearly-equal chunks.
pub fn split_parts(data: &[u8], parts: usize) -> Vec<Vec<u8>> {
    let chunk = data.len().div_ceil(parts);
    data.chunks(chunk).map(|c| c.to_vec()).collect()
}

/// Mount the auth endpoint returning a session id.
pub async fn mount_auth(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responseStatus": "SUCCESS",
            "sessionId": "test-session-id"
        })))
        .mount(server)
        .await;
}

/// Mount the list endpoint with one descriptor whose parts live at
/// `/part/{n}`, and the part endpoints themselves. `part_delays_ms` applies a
/// per-part response delay so download completion order can be forced.
pub async fn mount_extract(
    server: &MockServer,
    name: &str,
    extract_type: &str,
    start: &str,
    stop: &str,
    parts: &[Vec<u8>],
    part_delays_ms: &[u64],
) {
    let filepart_details: Vec<_> = parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            json!({
                "name": format!("{name}.{:03}", i + 1),
                "filename": format!("{name}.tar.gz.{:03}", i + 1),
                "filepart": i + 1,
                "size": part.len(),
                "url": format!("{}/part/{}", server.uri(), i + 1),
            })
        })
        .collect();

    let total_size: usize = parts.iter().map(|p| p.len()).sum();

    Mock::given(method("GET"))
        .and(path("/services/directdata/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responseStatus": "SUCCESS",
            "data": [{
                "name": name,
                "filename": format!("{name}.tar.gz"),
                "extract_type": extract_type,
                "start_time": start,
                "stop_time": stop,
                "record_count": 2,
                "size": total_size,
                "fileparts": parts.len(),
                "filepart_details": filepart_details,
            }],
            "responseDetails": {"total": 1}
        })))
        .mount(server)
        .await;

    for (i, part) in parts.iter().enumerate() {
        let delay = part_delays_ms.get(i).copied().unwrap_or(0);
        Mock::given(method("GET"))
            .and(path(format!("/part/{}", i + 1)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(part.clone())
                    .set_delay(std::time::Duration::from_millis(delay)),
            )
            .mount(server)
            .await;
    }
}

/// Mount the list endpoint with several single-part archives, each served
/// whole from `/archives/{name}`.
pub async fn mount_extract_batch(
    server: &MockServer,
    extract_type: &str,
    start: &str,
    stop: &str,
    archives: &[(&str, &[u8])],
) {
    let data: Vec<_> = archives
        .iter()
        .map(|(name, bytes)| {
            json!({
                "name": name,
                "filename": format!("{name}.tar.gz"),
                "extract_type": extract_type,
                "start_time": start,
                "stop_time": stop,
                "record_count": 1,
                "size": bytes.len(),
                "fileparts": 1,
                "filepart_details": [{
                    "name": format!("{name}.001"),
                    "filename": format!("{name}.tar.gz.001"),
                    "filepart": 1,
                    "size": bytes.len(),
                    "url": format!("{}/archives/{name}", server.uri()),
                }],
            })
        })
        .collect();

    let total = data.len();
    Mock::given(method("GET"))
        .and(path("/services/directdata/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responseStatus": "SUCCESS",
            "data": data,
            "responseDetails": {"total": total}
        })))
        .mount(server)
        .await;

    for (name, bytes) in archives {
        Mock::given(method("GET"))
            .and(path(format!("/archives/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.to_vec()))
            .mount(server)
            .await;
    }
}
