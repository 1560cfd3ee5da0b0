//! File service: couples the blob store, the catalog, and upload sessions.

use crate::error::{ApiError, ApiResult};
use hyperfs_core::{ContentDigest, validate_name};
use hyperfs_metadata::{CatalogStore, FileCommit, NodeRow};
use hyperfs_storage::{BlobStore, StorageError, UploadSession};
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::fs;

/// Descriptor for a prepared download.
pub struct Download {
    pub digest: ContentDigest,
    /// On-disk blob size; authoritative for range math.
    pub size: u64,
    pub name: String,
}

/// Orchestrates upload commits, downloads, and namespace mutations across
/// the catalog and the blob store.
#[derive(Clone)]
pub struct FileService {
    catalog: Arc<dyn CatalogStore>,
    blobs: Arc<dyn BlobStore>,
    tmp_dir: PathBuf,
}

/// Current time as epoch millis.
pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

impl FileService {
    pub fn new(catalog: Arc<dyn CatalogStore>, blobs: Arc<dyn BlobStore>, tmp_dir: PathBuf) -> Self {
        Self {
            catalog,
            blobs,
            tmp_dir,
        }
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.catalog
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Open a new upload session in the temp directory.
    pub async fn start_upload(&self) -> ApiResult<UploadSession> {
        Ok(UploadSession::start(&self.tmp_dir).await?)
    }

    /// Commit a finished upload into the catalog and the blob directory.
    ///
    /// Post-commit side effects run in a fixed order: first the temp file is
    /// placed (or discarded), then the files of blobs the commit
    /// unreferenced are removed. A placement failure triggers a
    /// compensating transaction that undoes the catalog commit.
    pub async fn finish_upload(
        &self,
        session: UploadSession,
        parent_id: i64,
        name: &str,
    ) -> ApiResult<FileCommit> {
        validate_name(name)?;
        let finished = session.finish().await?;
        let digest_hex = finished.digest.to_hex();

        let commit = match self
            .catalog
            .commit_file(parent_id, name, &digest_hex, finished.size as i64, now_ms())
            .await
        {
            Ok(commit) => commit,
            Err(e) => {
                let _ = fs::remove_file(&finished.temp_path).await;
                return Err(e.into());
            }
        };

        if commit.needs_placement {
            if let Err(place_err) = self.blobs.place(&finished.temp_path, &finished.digest).await {
                tracing::error!(
                    digest = %digest_hex,
                    error = %place_err,
                    "blob placement failed, revoking catalog commit"
                );
                if let Err(revoke_err) = self.catalog.revoke_commit(&commit).await {
                    tracing::error!(
                        digest = %digest_hex,
                        error = %revoke_err,
                        "compensating transaction failed; catalog and data directory diverge until the next sweep"
                    );
                }
                let _ = fs::remove_file(&finished.temp_path).await;
                return Err(place_err.into());
            }
        } else {
            let _ = fs::remove_file(&finished.temp_path).await;
        }

        self.remove_blob_files(&commit.unreferenced).await;

        tracing::info!(
            node_id = commit.node_id,
            digest = %digest_hex,
            size = finished.size,
            duplicate = commit.is_duplicate(),
            "upload committed"
        );
        Ok(commit)
    }

    /// Prepare a download: verify the node is a file, bump its counter, and
    /// locate the blob.
    pub async fn prepare_download(&self, id: i64) -> ApiResult<Download> {
        let node = self
            .catalog
            .get_node(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("node {id}")))?;
        if node.is_folder {
            return Err(ApiError::BadRequest(format!("node {id} is a folder")));
        }
        let digest_hex = node
            .digest
            .as_deref()
            .ok_or_else(|| ApiError::Internal(format!("file node {id} has no digest")))?;
        let digest = ContentDigest::from_hex(digest_hex)
            .map_err(|e| ApiError::Internal(format!("corrupt digest on node {id}: {e}")))?;

        self.catalog.increment_download_count(id).await?;

        let handle = match self.blobs.open(&digest).await {
            Ok(handle) => handle,
            Err(StorageError::NotFound(_)) => return Err(ApiError::MissingBlob(id)),
            Err(e) => return Err(e.into()),
        };

        Ok(Download {
            digest,
            size: handle.size,
            name: node.name,
        })
    }

    pub async fn list(&self, parent_id: i64) -> ApiResult<Vec<NodeRow>> {
        Ok(self.catalog.list_children(parent_id).await?)
    }

    pub async fn create_folder(&self, parent_id: i64, name: &str) -> ApiResult<i64> {
        validate_name(name)?;
        Ok(self.catalog.insert_folder(parent_id, name, now_ms()).await?)
    }

    pub async fn rename(&self, id: i64, new_name: &str) -> ApiResult<()> {
        validate_name(new_name)?;
        Ok(self.catalog.rename_node(id, new_name).await?)
    }

    /// Delete a node and its subtree; blobs that lost their last reference
    /// have their files removed post-commit.
    pub async fn delete(&self, id: i64) -> ApiResult<()> {
        let unreferenced = self.catalog.delete_subtree(id).await?;
        self.remove_blob_files(&unreferenced).await;
        Ok(())
    }

    pub async fn move_node(
        &self,
        id: i64,
        new_parent_id: i64,
        new_name: Option<&str>,
        strategy: hyperfs_core::ConflictStrategy,
    ) -> ApiResult<hyperfs_metadata::MoveOutcome> {
        if let Some(name) = new_name {
            validate_name(name)?;
        }
        let outcome = self
            .catalog
            .move_node(id, new_parent_id, new_name, strategy)
            .await?;
        self.remove_blob_files(&outcome.unreferenced).await;
        Ok(outcome)
    }

    pub async fn copy_node(
        &self,
        id: i64,
        new_parent_id: i64,
        strategy: hyperfs_core::ConflictStrategy,
    ) -> ApiResult<hyperfs_metadata::CopyOutcome> {
        let outcome = self
            .catalog
            .copy_node(id, new_parent_id, strategy, now_ms())
            .await?;
        self.remove_blob_files(&outcome.unreferenced).await;
        Ok(outcome)
    }

    /// Resolve a `/`-separated path from the root. The empty path yields the
    /// synthetic root descriptor.
    pub async fn resolve_path(&self, path: &str) -> ApiResult<NodeRow> {
        let mut current = NodeRow::root();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = self
                .catalog
                .get_child(current.id, segment)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("path not found: {path}")))?;
        }
        Ok(current)
    }

    /// Resolve the parent directory of `path` and return it with the leaf
    /// name. Fails on the root path itself.
    pub async fn resolve_parent(&self, path: &str) -> ApiResult<(NodeRow, String)> {
        let trimmed = path.trim_end_matches('/');
        let (dir, leaf) = match trimmed.rfind('/') {
            Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
            None => ("", trimmed),
        };
        if leaf.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "path has no final component: {path}"
            )));
        }
        let parent = self.resolve_path(dir).await?;
        Ok((parent, leaf.to_string()))
    }

    /// Best-effort removal of blob files whose records are gone. The record
    /// delete is authoritative; a leftover file is re-collected by the
    /// startup sweep.
    async fn remove_blob_files(&self, digests: &[String]) {
        for hex in digests {
            match ContentDigest::from_hex(hex) {
                Ok(digest) => {
                    if let Err(e) = self.blobs.remove(&digest).await {
                        tracing::warn!(digest = %hex, error = %e, "failed to remove unreferenced blob file");
                    }
                }
                Err(e) => {
                    tracing::warn!(digest = %hex, error = %e, "unreferenced digest is not valid hex")
                }
            }
        }
    }
}
