//! Namespace catalog for HyperFS.
//!
//! This crate provides the control-plane data model:
//! - The `nodes` tree: files and directories with per-parent name uniqueness
//! - The `blobs` table: content records with reference-counted lifecycle
//! - Transactional tree operations (upload commit, move, copy, delete)

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{BlobRow, NodeRow};
pub use repos::tree::{CommitDisposition, CopyOutcome, FileCommit, MoveOutcome};
pub use repos::{BlobRepo, NodeRepo, TreeRepo};
pub use store::{CatalogStore, SqliteCatalog};

use hyperfs_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a catalog store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn CatalogStore>> {
    let store = SqliteCatalog::new(&config.path).await?;
    Ok(Arc::new(store) as Arc<dyn CatalogStore>)
}
