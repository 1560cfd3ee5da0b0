//! Transactional tree operations.

use crate::error::MetadataResult;
use async_trait::async_trait;
use hyperfs_core::ConflictStrategy;

/// How an upload commit changed the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitDisposition {
    /// A new file node was created.
    Created,
    /// A same-name sibling already carried this digest; nothing changed.
    Duplicate,
    /// A same-name file was rewritten in place to reference the new blob.
    Replaced {
        previous_digest: String,
        previous_size: i64,
        previous_upload_time: i64,
    },
}

/// Outcome of `commit_file`. Carries everything the caller needs for the
/// post-commit side effects and for compensation if those fail.
#[derive(Debug, Clone)]
pub struct FileCommit {
    pub node_id: i64,
    pub parent_id: i64,
    pub name: String,
    /// The committed content digest (hex).
    pub digest: String,
    pub size: i64,
    pub disposition: CommitDisposition,
    /// True when this commit created the blob record (refcount became 1):
    /// the caller must place the uploaded bytes into the blob directory.
    pub needs_placement: bool,
    /// Digests whose record was deleted in this transaction. The backing
    /// files are removed post-commit, after placement succeeded.
    pub unreferenced: Vec<String>,
}

impl FileCommit {
    /// Whether the upload was a whole no-op (same name, same content).
    pub fn is_duplicate(&self) -> bool {
        self.disposition == CommitDisposition::Duplicate
    }
}

/// Outcome of a move.
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub node_id: i64,
    /// The name the node ended up with (differs under the RENAME strategy).
    pub final_name: String,
    /// Digests unreferenced by an OVERWRITE of the conflicting file.
    pub unreferenced: Vec<String>,
}

/// Outcome of a copy.
#[derive(Debug, Clone)]
pub struct CopyOutcome {
    /// Id of the copy's root node (the rewritten node for OVERWRITE).
    pub node_id: i64,
    pub final_name: String,
    /// Digests unreferenced by an OVERWRITE of the conflicting file.
    pub unreferenced: Vec<String>,
}

/// Multi-step mutations of the namespace tree.
///
/// Each operation runs in a single transaction; conflict-sensitive reads
/// (sibling checks, ancestor walks) happen inside the transaction that
/// performs the guarded write.
#[async_trait]
pub trait TreeRepo {
    /// Commit a finished upload into the catalog: dedup against same-name
    /// same-content siblings, reject folder conflicts, overwrite files in
    /// place.
    async fn commit_file(
        &self,
        parent_id: i64,
        name: &str,
        digest: &str,
        size: i64,
        now_ms: i64,
    ) -> MetadataResult<FileCommit>;

    /// Compensate a commit whose post-commit blob placement failed: delete a
    /// created node or restore a replaced node's previous content reference.
    async fn revoke_commit(&self, commit: &FileCommit) -> MetadataResult<()>;

    /// Delete a node and (for directories) its entire subtree, decrementing
    /// every removed file's blob. Returns the digests that dropped to
    /// refcount zero; their files are removed post-commit.
    async fn delete_subtree(&self, id: i64) -> MetadataResult<Vec<String>>;

    /// Move (and optionally rename) a node under a new parent.
    async fn move_node(
        &self,
        id: i64,
        new_parent_id: i64,
        new_name: Option<&str>,
        strategy: ConflictStrategy,
    ) -> MetadataResult<MoveOutcome>;

    /// Copy a node (recursively for directories) under a new parent. File
    /// content is shared by refcount; bytes are never copied.
    async fn copy_node(
        &self,
        id: i64,
        new_parent_id: i64,
        strategy: ConflictStrategy,
        now_ms: i64,
    ) -> MetadataResult<CopyOutcome>;
}
