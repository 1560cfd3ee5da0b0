//! Startup consistency sweep.
//!
//! A crash can leave three kinds of residue: temp files from in-flight
//! uploads, blob records whose refcount never recovered from a failed
//! compensation, and blob files whose record was rolled back. All three only
//! ever shrink state, so the sweep runs unconditionally at boot.

use hyperfs_metadata::{CatalogStore, MetadataError};
use hyperfs_storage::{BlobStore, StorageError};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("catalog error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the sweep removed.
#[derive(Debug, Default)]
pub struct SweepStats {
    pub stale_temp_files: u64,
    pub dangling_records: u64,
    pub orphaned_blob_files: u64,
}

/// Remove stale upload temp files, dangling blob records, and orphaned blob
/// files. Idempotent.
pub async fn run_startup_sweep(
    catalog: &Arc<dyn CatalogStore>,
    blobs: &Arc<dyn BlobStore>,
    tmp_dir: &Path,
) -> Result<SweepStats, SweepError> {
    let mut stats = SweepStats::default();

    // Temp files from uploads that never finished or aborted
    fs::create_dir_all(tmp_dir).await?;
    let mut entries = fs::read_dir(tmp_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with("upload_") && name.ends_with(".tmp") {
            if let Err(e) = fs::remove_file(entry.path()).await {
                tracing::warn!(file = name, error = %e, "failed to remove stale temp file");
            } else {
                stats.stale_temp_files += 1;
            }
        }
    }

    // Records left at refcount <= 0 by a failed compensation
    for digest_hex in catalog.delete_unreferenced_blobs().await? {
        stats.dangling_records += 1;
        if let Ok(digest) = hyperfs_core::ContentDigest::from_hex(&digest_hex) {
            let _ = blobs.remove(&digest).await;
        }
    }

    // Files whose record was rolled back between catalog commit and placement
    for digest in blobs.list().await? {
        if catalog.lookup_blob(&digest.to_hex()).await?.is_none() {
            blobs.remove(&digest).await?;
            stats.orphaned_blob_files += 1;
        }
    }

    tracing::info!(
        stale_temp_files = stats.stale_temp_files,
        dangling_records = stats.dangling_records,
        orphaned_blob_files = stats.orphaned_blob_files,
        "startup sweep finished"
    );
    Ok(stats)
}
