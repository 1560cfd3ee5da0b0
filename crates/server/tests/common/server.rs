//! Server test fixture.

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use hyperfs_core::config::AppConfig;
use hyperfs_server::{AppState, create_router};
use serde_json::Value;
use std::path::PathBuf;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage and catalog.
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let config = AppConfig::for_testing(temp_dir.path());

        let blobs = hyperfs_storage::from_config(&config.storage)
            .await
            .expect("Failed to create blob store");
        let catalog = hyperfs_metadata::from_config(&config.metadata)
            .await
            .expect("Failed to create catalog");

        let state = AppState::new(config, catalog, blobs);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// The blob data directory of this server instance.
    pub fn data_dir(&self) -> PathBuf {
        self.state.config.storage.data_dir.clone()
    }

    /// Number of blob files currently on disk.
    pub fn blob_file_count(&self) -> usize {
        match std::fs::read_dir(self.data_dir()) {
            Ok(entries) => entries.filter_map(Result::ok).count(),
            Err(_) => 0,
        }
    }

    /// Send a request through the router and collect the response.
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Body,
    ) -> (StatusCode, HeaderMap, Bytes) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(body).expect("Failed to build request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Request failed");

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");
        (status, headers, body)
    }

    /// Upload bytes as `filename` under `parent_id`, returning the status.
    pub async fn upload(&self, parent_id: i64, filename: &str, data: &[u8]) -> StatusCode {
        let uri = format!("/upload?parentId={parent_id}&filename={filename}");
        let (status, _, _) = self
            .request("POST", &uri, &[], Body::from(data.to_vec()))
            .await;
        status
    }

    /// List children of a directory as parsed JSON.
    pub async fn list(&self, parent_id: i64) -> Vec<Value> {
        let (status, _, body) = self
            .request("GET", &format!("/list?parentId={parent_id}"), &[], Body::empty())
            .await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice(&body).expect("list response is not JSON")
    }

    /// Find a child by name in a directory listing.
    pub async fn find_child(&self, parent_id: i64, name: &str) -> Option<Value> {
        self.list(parent_id)
            .await
            .into_iter()
            .find(|node| node["name"] == name)
    }

    /// Create a folder and return its id.
    pub async fn create_folder(&self, parent_id: i64, name: &str) -> i64 {
        let uri = format!("/folder?parentId={parent_id}&name={name}");
        let (status, _, body) = self.request("POST", &uri, &[], Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        String::from_utf8_lossy(&body)
            .parse()
            .expect("folder response is not an id")
    }

    /// Issue a JSON control request (move/rename/copy).
    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Bytes) {
        let (status, _, bytes) = self
            .request(
                "POST",
                uri,
                &[("content-type", "application/json")],
                Body::from(serde_json::to_vec(&body).unwrap()),
            )
            .await;
        (status, bytes)
    }
}
