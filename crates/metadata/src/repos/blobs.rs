//! Blob repository trait.

use crate::error::MetadataResult;
use crate::models::BlobRow;
use async_trait::async_trait;

/// Read and maintenance operations on blob records.
///
/// Refcount mutations are not exposed here: they only happen inside the tree
/// transactions so that a file node and its blob reference move together.
#[async_trait]
pub trait BlobRepo {
    /// Fetch a blob record by hex digest.
    async fn lookup_blob(&self, digest: &str) -> MetadataResult<Option<BlobRow>>;

    /// Delete every blob record whose refcount dropped to zero or below
    /// (left behind by failed compensations) and return their digests.
    async fn delete_unreferenced_blobs(&self) -> MetadataResult<Vec<String>>;
}
