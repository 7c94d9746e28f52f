//! Common test utilities for dexfetch integration tests

#![allow(dead_code)]

use dexfetch::Config;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path prefix the mock API serves records under
pub const API_PREFIX: &str = "/api/v2/pokemon";

/// Short retry delay so tests stay fast
pub const BASE_DELAY: Duration = Duration::from_millis(50);

/// A record body that passes the default validation rules
pub fn record(id: u32, name: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": name,
        "height": 3,
        "weight": 40,
    })
}

/// Config pointing at the mock server with a temporary output directory
pub fn config_for(server: &MockServer) -> (Config, TempDir) {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut config = Config::default();
    config.api.base_url = format!("{}{}", server.uri(), API_PREFIX);
    config.api.connect_timeout = Duration::from_secs(2);
    config.api.total_timeout = Duration::from_secs(5);
    config.retry.base_delay = BASE_DELAY;
    config.output.output_dir = temp.path().join("artifacts");
    config.progress_interval = Duration::from_millis(100);
    (config, temp)
}

/// Serve `body` for `name` with status 200
pub async fn mount_record(server: &MockServer, id: u32, name: &str) {
    Mock::given(method("GET"))
        .and(path(format!("{API_PREFIX}/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(record(id, name)))
        .mount(server)
        .await;
}

/// Answer every request for `name` with `status`
pub async fn mount_status(server: &MockServer, name: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("{API_PREFIX}/{name}")))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Answer the first request for `name` with `status`, later ones with the record
pub async fn mount_status_then_record(server: &MockServer, id: u32, name: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("{API_PREFIX}/{name}")))
        .respond_with(ResponseTemplate::new(status))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;
    mount_record(server, id, name).await;
}

/// Number of requests the server received for `name`
pub async fn requests_for(server: &MockServer, name: &str) -> usize {
    let wanted = format!("{API_PREFIX}/{name}");
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == wanted)
        .count()
}
