//! Database models mapping to the catalog schema.

use sqlx::FromRow;

/// A node in the namespace tree: a file (with a blob reference) or a
/// directory.
#[derive(Debug, Clone, FromRow)]
pub struct NodeRow {
    pub id: i64,
    pub parent_id: i64,
    pub name: String,
    pub is_folder: bool,
    /// Content digest as 64-char lowercase hex. Present iff this is a file.
    pub digest: Option<String>,
    pub size: i64,
    /// Creation / last-modification time, epoch millis.
    pub upload_time: i64,
    pub download_count: i64,
}

impl NodeRow {
    /// Whether this node is a file.
    pub fn is_file(&self) -> bool {
        !self.is_folder
    }

    /// The synthetic root descriptor. The root is implicit and never stored.
    pub fn root() -> Self {
        Self {
            id: hyperfs_core::ROOT_ID,
            parent_id: hyperfs_core::ROOT_ID,
            name: String::new(),
            is_folder: true,
            digest: None,
            size: 0,
            upload_time: 0,
            download_count: 0,
        }
    }
}

/// A content blob record. The backing file lives at `<data-dir>/<digest>`.
#[derive(Debug, Clone, FromRow)]
pub struct BlobRow {
    /// 64-char lowercase hex digest. Primary key.
    pub digest: String,
    pub size: i64,
    /// Count of file nodes referencing this blob. The record is deleted when
    /// it reaches zero.
    pub refcount: i64,
    pub created_at: String,
}
