//! Blob storage for HyperFS.
//!
//! This crate provides:
//! - A content-addressed blob directory keyed by digest, with atomic
//!   placement of finished uploads
//! - Streaming upload sessions that hash and persist request bodies
//!   chunk-by-chunk

pub mod blobs;
pub mod error;
pub mod upload;

pub use blobs::{BlobStore, FsBlobStore};
pub use error::{StorageError, StorageResult};
pub use upload::{FinishedUpload, UploadSession};

use hyperfs_core::config::StorageConfig;
use std::sync::Arc;

/// Create a blob store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    let store = FsBlobStore::new(&config.data_dir).await?;
    Ok(Arc::new(store))
}
