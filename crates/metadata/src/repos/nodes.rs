//! Node repository trait.

use crate::error::MetadataResult;
use crate::models::NodeRow;
use async_trait::async_trait;

/// Read and single-row operations on namespace nodes.
#[async_trait]
pub trait NodeRepo {
    /// Fetch a node by id.
    async fn get_node(&self, id: i64) -> MetadataResult<Option<NodeRow>>;

    /// Fetch a child of `parent_id` by name.
    async fn get_child(&self, parent_id: i64, name: &str) -> MetadataResult<Option<NodeRow>>;

    /// List the children of a directory, ordered by id.
    async fn list_children(&self, parent_id: i64) -> MetadataResult<Vec<NodeRow>>;

    /// Create a directory. Fails with `NameConflict` when a sibling of any
    /// kind carries the same name.
    async fn insert_folder(&self, parent_id: i64, name: &str, now_ms: i64) -> MetadataResult<i64>;

    /// Change a node's name in place. A same-name rename is a no-op.
    async fn rename_node(&self, id: i64, new_name: &str) -> MetadataResult<()>;

    /// Bump a node's download counter.
    async fn increment_download_count(&self, id: i64) -> MetadataResult<()>;
}
