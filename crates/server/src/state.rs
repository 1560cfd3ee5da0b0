//! Application state shared across handlers.

use crate::service::FileService;
use hyperfs_core::config::AppConfig;
use hyperfs_metadata::CatalogStore;
use hyperfs_storage::BlobStore;
use std::sync::Arc;

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub catalog: Arc<dyn CatalogStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub files: FileService,
}

impl AppState {
    /// Create application state, wiring the file service to the stores.
    pub fn new(
        config: AppConfig,
        catalog: Arc<dyn CatalogStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let files = FileService::new(
            catalog.clone(),
            blobs.clone(),
            config.storage.tmp_dir.clone(),
        );
        Self {
            config,
            catalog,
            blobs,
            files,
        }
    }
}
