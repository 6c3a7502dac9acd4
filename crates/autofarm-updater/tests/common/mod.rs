/*
[INPUT]:  Test configuration and mock server requirements
[OUTPUT]: Shared test utilities, fixtures, and mock helpers
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for autofarm-updater tests

use autofarm_updater::{ProgressSink, ReleaseClient, ReleaseSource};
use wiremock::MockServer;

pub const OWNER: &str = "farm-owner";
pub const REPO: &str = "farm-repo";

/// Setup a mock HTTP server for testing
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

/// Release client pointed at the mock server
pub fn client_for(server: &MockServer, current_version: &str) -> ReleaseClient {
    let mut source = ReleaseSource::new(OWNER, REPO);
    source.api_base_url = server.uri();
    ReleaseClient::new(source, current_version).expect("release client")
}

pub fn latest_release_path() -> String {
    format!("/repos/{OWNER}/{REPO}/releases/latest")
}

/// Release JSON with a single asset served by the mock server
pub fn release_json(server: &MockServer, tag: &str, size: u64) -> serde_json::Value {
    serde_json::json!({
        "tag_name": tag,
        "name": tag,
        "draft": false,
        "prerelease": false,
        "published_at": "2026-09-01T12:00:00Z",
        "assets": [
            {
                "name": "autofarm-update.bin",
                "browser_download_url": format!("{}/download/autofarm-update.bin", server.uri()),
                "size": size
            }
        ]
    })
}

/// Records every progress callback
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub started: Vec<u64>,
    pub advanced: Vec<u64>,
}

impl ProgressSink for RecordingSink {
    fn started(&mut self, total: u64) {
        self.started.push(total);
    }

    fn advanced(&mut self, downloaded: u64) {
        self.advanced.push(downloaded);
    }
}
