//! Integration tests for the control endpoints.

mod common;

use axum::body::Body;
use axum::http::StatusCode;
use common::TestServer;
use hyperfs_core::ContentDigest;
use serde_json::json;

#[tokio::test]
async fn test_upload_download_roundtrip() {
    let server = TestServer::new().await;
    let data = b"The quick brown fox jumps over the lazy dog";

    assert_eq!(server.upload(0, "fox.txt", data).await, StatusCode::CREATED);

    let node = server.find_child(0, "fox.txt").await.unwrap();
    assert_eq!(node["isFolder"], 0);
    assert_eq!(node["size"], data.len() as i64);
    assert_eq!(node["hash"], ContentDigest::compute(data).to_hex());

    let id = node["id"].as_i64().unwrap();
    let (status, headers, body) = server
        .request("GET", &format!("/download?id={id}"), &[], Body::empty())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], data);
    assert_eq!(headers["accept-ranges"], "bytes");
    assert_eq!(headers["content-length"], data.len().to_string().as_str());

    // Download counter is bumped per download
    let node = server.find_child(0, "fox.txt").await.unwrap();
    assert_eq!(node["downloadCount"], 1);
}

#[tokio::test]
async fn test_dedup_same_content_two_names() {
    let server = TestServer::new().await;
    let data = vec![0u8; 1_048_576];

    assert_eq!(server.upload(0, "a", &data).await, StatusCode::CREATED);
    assert_eq!(server.upload(0, "b", &data).await, StatusCode::CREATED);

    // Exactly one file on disk, refcount 2
    assert_eq!(server.blob_file_count(), 1);
    let digest = ContentDigest::compute(&data).to_hex();
    let blob = server
        .state
        .catalog
        .lookup_blob(&digest)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(blob.refcount, 2);
    assert_eq!(blob.size, 1_048_576);
}

#[tokio::test]
async fn test_upload_idempotent_on_content() {
    let server = TestServer::new().await;
    let data = b"idempotent payload";

    assert_eq!(server.upload(0, "f", data).await, StatusCode::CREATED);
    let first = server.find_child(0, "f").await.unwrap();

    assert_eq!(server.upload(0, "f", data).await, StatusCode::CREATED);
    let second = server.find_child(0, "f").await.unwrap();

    assert_eq!(first["id"], second["id"]);
    assert_eq!(server.list(0).await.len(), 1);
    assert_eq!(server.blob_file_count(), 1);

    let digest = ContentDigest::compute(data).to_hex();
    let blob = server
        .state
        .catalog
        .lookup_blob(&digest)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(blob.refcount, 1);
}

#[tokio::test]
async fn test_overwrite_replaces_blob_and_keeps_id() {
    let server = TestServer::new().await;
    let before = b"first version";
    let after = b"second version, longer";

    server.upload(0, "x", before).await;
    let first = server.find_child(0, "x").await.unwrap();

    server.upload(0, "x", after).await;
    let second = server.find_child(0, "x").await.unwrap();

    assert_eq!(first["id"], second["id"]);
    assert_eq!(second["size"], after.len() as i64);

    let old_digest = ContentDigest::compute(before).to_hex();
    let new_digest = ContentDigest::compute(after).to_hex();
    assert!(
        server
            .state
            .catalog
            .lookup_blob(&old_digest)
            .await
            .unwrap()
            .is_none()
    );
    let blob = server
        .state
        .catalog
        .lookup_blob(&new_digest)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(blob.refcount, 1);

    // Only the new content remains on disk
    assert_eq!(server.blob_file_count(), 1);
    assert!(server.data_dir().join(&new_digest).exists());
}

#[tokio::test]
async fn test_upload_conflicting_with_folder_name() {
    let server = TestServer::new().await;
    server.create_folder(0, "docs").await;

    let uri = "/upload?parentId=0&filename=docs";
    let (status, _, body) = server
        .request("POST", uri, &[], Body::from("contents"))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(String::from_utf8_lossy(&body).starts_with("Error: "));

    // The failed upload leaves no temp files behind
    let tmp_entries = std::fs::read_dir(server.state.config.storage.tmp_dir.clone())
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(tmp_entries, 0);
}

#[tokio::test]
async fn test_folder_create_and_conflict() {
    let server = TestServer::new().await;
    let id = server.create_folder(0, "projects").await;
    assert!(id > 0);

    let (status, _, body) = server
        .request("POST", "/folder?parentId=0&name=projects", &[], Body::empty())
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(String::from_utf8_lossy(&body).starts_with("Error: "));
}

#[tokio::test]
async fn test_move_with_rename_conflict_strategy() {
    let server = TestServer::new().await;
    server.upload(0, "a.txt", b"root copy").await;
    let dir = server.create_folder(0, "dir").await;
    server.upload(dir, "a.txt", b"dir copy").await;

    let source = server.find_child(0, "a.txt").await.unwrap();
    let (status, _) = server
        .post_json(
            "/move",
            json!({"id": source["id"], "targetParentId": dir, "strategy": "RENAME"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    assert!(server.find_child(dir, "a.txt").await.is_some());
    let renamed = server.find_child(dir, "a (1).txt").await.unwrap();
    assert_eq!(renamed["id"], source["id"]);
    assert!(server.find_child(0, "a.txt").await.is_none());
}

#[tokio::test]
async fn test_move_default_strategy_conflicts() {
    let server = TestServer::new().await;
    server.upload(0, "a", b"1").await;
    let dir = server.create_folder(0, "dir").await;
    server.upload(dir, "a", b"2").await;

    let source = server.find_child(0, "a").await.unwrap();
    let (status, body) = server
        .post_json("/move", json!({"id": source["id"], "targetParentId": dir}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(String::from_utf8_lossy(&body).starts_with("Error: "));
}

#[tokio::test]
async fn test_move_into_own_subtree_rejected() {
    let server = TestServer::new().await;
    let p = server.create_folder(0, "p").await;
    let q = server.create_folder(p, "q").await;
    let r = server.create_folder(q, "r").await;

    let (status, _) = server
        .post_json("/move", json!({"id": p, "targetParentId": r}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Tree unchanged
    let r_node = server.find_child(q, "r").await.unwrap();
    assert_eq!(r_node["id"], r);
    let p_node = server.find_child(0, "p").await.unwrap();
    assert_eq!(p_node["id"], p);
}

#[tokio::test]
async fn test_move_missing_body_fields() {
    let server = TestServer::new().await;
    let (status, body) = server.post_json("/move", json!({"id": 1})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(String::from_utf8_lossy(&body).starts_with("Error: "));
}

#[tokio::test]
async fn test_rename_endpoint() {
    let server = TestServer::new().await;
    server.upload(0, "old.txt", b"data").await;
    server.upload(0, "taken.txt", b"other").await;
    let node = server.find_child(0, "old.txt").await.unwrap();

    let (status, _) = server
        .post_json("/rename", json!({"id": node["id"], "name": "new.txt"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(server.find_child(0, "new.txt").await.is_some());

    let (status, _) = server
        .post_json("/rename", json!({"id": node["id"], "name": "taken.txt"}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_copy_shares_content() {
    let server = TestServer::new().await;
    let data = b"copied bytes";
    server.upload(0, "orig", data).await;
    let dir = server.create_folder(0, "dir").await;

    let node = server.find_child(0, "orig").await.unwrap();
    let (status, _) = server
        .post_json("/copy", json!({"id": node["id"], "targetParentId": dir}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let copy = server.find_child(dir, "orig").await.unwrap();
    assert_ne!(copy["id"], node["id"]);
    assert_eq!(copy["hash"], node["hash"]);

    // Physical bytes are never copied
    assert_eq!(server.blob_file_count(), 1);
    let blob = server
        .state
        .catalog
        .lookup_blob(&ContentDigest::compute(data).to_hex())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(blob.refcount, 2);
}

#[tokio::test]
async fn test_recursive_delete_releases_blobs() {
    let server = TestServer::new().await;
    let p = server.create_folder(0, "p").await;

    // 50 files over 10 distinct payloads, 5 references each
    let mut folders = vec![p];
    for i in 0..4 {
        folders.push(server.create_folder(p, &format!("sub{i}")).await);
    }
    for i in 0..50 {
        let payload = format!("payload number {}", i % 10);
        let folder = folders[i % folders.len()];
        assert_eq!(
            server
                .upload(folder, &format!("f{i}"), payload.as_bytes())
                .await,
            StatusCode::CREATED
        );
    }
    assert_eq!(server.blob_file_count(), 10);

    let (status, _, _) = server
        .request("POST", &format!("/delete?id={p}"), &[], Body::empty())
        .await;
    assert_eq!(status, StatusCode::OK);

    assert!(server.list(0).await.is_empty());
    assert_eq!(server.blob_file_count(), 0);
    for i in 0..10 {
        let digest = ContentDigest::compute(format!("payload number {i}").as_bytes()).to_hex();
        assert!(
            server
                .state
                .catalog
                .lookup_blob(&digest)
                .await
                .unwrap()
                .is_none()
        );
    }
}

#[tokio::test]
async fn test_delete_missing_node() {
    let server = TestServer::new().await;
    let (status, _, body) = server
        .request("POST", "/delete?id=4242", &[], Body::empty())
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(String::from_utf8_lossy(&body).starts_with("Error: "));
}

#[tokio::test]
async fn test_range_requests() {
    let server = TestServer::new().await;
    let data: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
    server.upload(0, "ranged", &data).await;
    let id = server.find_child(0, "ranged").await.unwrap()["id"]
        .as_i64()
        .unwrap();
    let uri = format!("/download?id={id}");

    // Closed range
    let (status, headers, body) = server
        .request("GET", &uri, &[("Range", "bytes=10-19")], Body::empty())
        .await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers["content-range"], "bytes 10-19/1000");
    assert_eq!(headers["content-length"], "10");
    assert_eq!(&body[..], &data[10..20]);

    // Open-ended range
    let (status, headers, body) = server
        .request("GET", &uri, &[("Range", "bytes=990-")], Body::empty())
        .await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers["content-range"], "bytes 990-999/1000");
    assert_eq!(&body[..], &data[990..]);

    // Suffix range: the last 100 bytes
    let (status, headers, body) = server
        .request("GET", &uri, &[("Range", "bytes=-100")], Body::empty())
        .await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers["content-range"], "bytes 900-999/1000");
    assert_eq!(&body[..], &data[900..]);

    // Unsatisfiable ranges
    for range in ["bytes=1000-", "bytes=0-1000", "bytes=700-600"] {
        let (status, headers, _) = server
            .request("GET", &uri, &[("Range", range)], Body::empty())
            .await;
        assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE, "range {range}");
        assert_eq!(headers["content-range"], "bytes */1000");
    }

    // Unparseable ranges degrade to a full response
    let (status, _, body) = server
        .request("GET", &uri, &[("Range", "bytes=abc")], Body::empty())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.len(), 1000);
}

#[tokio::test]
async fn test_head_download() {
    let server = TestServer::new().await;
    server.upload(0, "headed", b"0123456789").await;
    let id = server.find_child(0, "headed").await.unwrap()["id"]
        .as_i64()
        .unwrap();

    let (status, headers, body) = server
        .request("HEAD", &format!("/download?id={id}"), &[], Body::empty())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-length"], "10");
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_download_error_cases() {
    let server = TestServer::new().await;
    let dir = server.create_folder(0, "dir").await;

    let (status, _, _) = server
        .request("GET", "/download", &[], Body::empty())
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = server
        .request("GET", "/download?id=999", &[], Body::empty())
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) = server
        .request("GET", &format!("/download?id={dir}"), &[], Body::empty())
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(String::from_utf8_lossy(&body).starts_with("Error: "));
}

#[tokio::test]
async fn test_content_disposition_encoding() {
    let server = TestServer::new().await;
    server.upload(0, "my%20report.pdf", b"pdf bytes").await;
    // The query parameter decodes to "my report.pdf"
    let node = server.find_child(0, "my report.pdf").await.unwrap();
    let id = node["id"].as_i64().unwrap();

    let (_, headers, _) = server
        .request("GET", &format!("/download?id={id}"), &[], Body::empty())
        .await;
    let disposition = headers["content-disposition"].to_str().unwrap();
    assert_eq!(
        disposition,
        "attachment; filename*=UTF-8''my%20report.pdf"
    );
}

#[tokio::test]
async fn test_unknown_route_falls_back() {
    let server = TestServer::new().await;
    let (status, _, body) = server.request("GET", "/nope", &[], Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(&body[..], b"Error: Not Found");
}

#[tokio::test]
async fn test_empty_file_upload_and_download() {
    let server = TestServer::new().await;
    assert_eq!(server.upload(0, "empty", b"").await, StatusCode::CREATED);

    let id = server.find_child(0, "empty").await.unwrap()["id"]
        .as_i64()
        .unwrap();
    let (status, headers, body) = server
        .request("GET", &format!("/download?id={id}"), &[], Body::empty())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-length"], "0");
    assert!(body.is_empty());
}
