//! Catalog store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{BlobRepo, NodeRepo, TreeRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Catalog schema (embedded).
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Combined catalog store trait.
#[async_trait]
pub trait CatalogStore: NodeRepo + BlobRepo + TreeRepo + Send + Sync {
    /// Apply the schema. Idempotent.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-backed catalog.
pub struct SqliteCatalog {
    pool: Pool<Sqlite>,
}

impl SqliteCatalog {
    /// Open (or create) the catalog database at `path`.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MetadataError::Internal(format!("failed to create database directory: {e}"))
            })?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // serializes transactions and avoids persistent "database is
            // locked" failures under server concurrency.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "catalog opened");

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement the repository traits for SqliteCatalog
mod sqlite_impl {
    use super::*;
    use crate::models::{BlobRow, NodeRow};
    use crate::repos::tree::{CommitDisposition, CopyOutcome, FileCommit, MoveOutcome};
    use hyperfs_core::{ConflictStrategy, ROOT_ID, numbered_variant};
    use sqlx::SqliteConnection;

    // -------------------------------------------------------------------------
    // In-transaction helpers
    // -------------------------------------------------------------------------

    async fn fetch_node(conn: &mut SqliteConnection, id: i64) -> MetadataResult<Option<NodeRow>> {
        let row = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    async fn fetch_child(
        conn: &mut SqliteConnection,
        parent_id: i64,
        name: &str,
    ) -> MetadataResult<Option<NodeRow>> {
        let row =
            sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE parent_id = ? AND name = ?")
                .bind(parent_id)
                .bind(name)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(row)
    }

    async fn fetch_children(
        conn: &mut SqliteConnection,
        parent_id: i64,
    ) -> MetadataResult<Vec<NodeRow>> {
        let rows =
            sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE parent_id = ? ORDER BY id")
                .bind(parent_id)
                .fetch_all(&mut *conn)
                .await?;
        Ok(rows)
    }

    async fn fetch_blob(
        conn: &mut SqliteConnection,
        digest: &str,
    ) -> MetadataResult<Option<BlobRow>> {
        let row = sqlx::query_as::<_, BlobRow>("SELECT * FROM blobs WHERE digest = ?")
            .bind(digest)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    /// Insert a blob record with refcount 1, or increment an existing one.
    /// Returns the new refcount; 1 means the caller owns blob placement.
    async fn insert_or_increment_blob(
        conn: &mut SqliteConnection,
        digest: &str,
        size: i64,
    ) -> MetadataResult<i64> {
        match fetch_blob(conn, digest).await? {
            None => {
                sqlx::query("INSERT INTO blobs (digest, size, refcount) VALUES (?, ?, 1)")
                    .bind(digest)
                    .bind(size)
                    .execute(&mut *conn)
                    .await?;
                Ok(1)
            }
            Some(blob) if blob.size == size => {
                sqlx::query("UPDATE blobs SET refcount = refcount + 1 WHERE digest = ?")
                    .bind(digest)
                    .execute(&mut *conn)
                    .await?;
                Ok(blob.refcount + 1)
            }
            Some(blob) => Err(MetadataError::DigestCollision {
                digest: digest.to_string(),
                stored: blob.size,
                claimed: size,
            }),
        }
    }

    /// Decrement a blob's refcount, deleting the record at zero. Returns the
    /// new refcount; 0 means the caller must remove the backing file
    /// post-commit.
    async fn decrement_blob(conn: &mut SqliteConnection, digest: &str) -> MetadataResult<i64> {
        let blob = fetch_blob(conn, digest)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("blob {digest}")))?;
        if blob.refcount <= 0 {
            return Err(MetadataError::InvalidState(format!(
                "blob {digest} has refcount {}",
                blob.refcount
            )));
        }
        let new_refcount = blob.refcount - 1;
        if new_refcount == 0 {
            sqlx::query("DELETE FROM blobs WHERE digest = ?")
                .bind(digest)
                .execute(&mut *conn)
                .await?;
        } else {
            sqlx::query("UPDATE blobs SET refcount = refcount - 1 WHERE digest = ?")
                .bind(digest)
                .execute(&mut *conn)
                .await?;
        }
        Ok(new_refcount)
    }

    async fn insert_file_row(
        conn: &mut SqliteConnection,
        parent_id: i64,
        name: &str,
        digest: &str,
        size: i64,
        now_ms: i64,
    ) -> MetadataResult<i64> {
        let result = sqlx::query(
            "INSERT INTO nodes (parent_id, name, is_folder, digest, size, upload_time) VALUES (?, ?, 0, ?, ?, ?)",
        )
        .bind(parent_id)
        .bind(name)
        .bind(digest)
        .bind(size)
        .bind(now_ms)
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn insert_folder_row(
        conn: &mut SqliteConnection,
        parent_id: i64,
        name: &str,
        now_ms: i64,
    ) -> MetadataResult<i64> {
        let result = sqlx::query(
            "INSERT INTO nodes (parent_id, name, is_folder, upload_time) VALUES (?, ?, 1, ?)",
        )
        .bind(parent_id)
        .bind(name)
        .bind(now_ms)
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_file_row(
        conn: &mut SqliteConnection,
        id: i64,
        digest: &str,
        size: i64,
        now_ms: i64,
    ) -> MetadataResult<()> {
        sqlx::query("UPDATE nodes SET digest = ?, size = ?, upload_time = ? WHERE id = ?")
            .bind(digest)
            .bind(size)
            .bind(now_ms)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Verify the prospective parent exists and is a directory.
    async fn ensure_parent_folder(
        conn: &mut SqliteConnection,
        parent_id: i64,
    ) -> MetadataResult<()> {
        if parent_id == ROOT_ID {
            return Ok(());
        }
        let parent = fetch_node(conn, parent_id)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("folder {parent_id}")))?;
        if !parent.is_folder {
            return Err(MetadataError::BadTarget(format!(
                "node {parent_id} is not a folder"
            )));
        }
        Ok(())
    }

    /// Walk the parent chain from `target_parent_id` up to the root,
    /// refusing any placement that would put `source_id` inside its own
    /// subtree.
    async fn ensure_no_cycle(
        conn: &mut SqliteConnection,
        source_id: i64,
        target_parent_id: i64,
    ) -> MetadataResult<()> {
        let mut current = target_parent_id;
        while current != ROOT_ID {
            if current == source_id {
                return Err(MetadataError::CycleForbidden(format!(
                    "node {source_id} cannot be placed inside its own subtree"
                )));
            }
            match fetch_node(conn, current).await? {
                Some(node) => current = node.parent_id,
                None => break,
            }
        }
        Ok(())
    }

    /// Pick the smallest free `name (n)` variant under `parent_id`.
    async fn pick_free_name(
        conn: &mut SqliteConnection,
        parent_id: i64,
        name: &str,
    ) -> MetadataResult<String> {
        let mut n = 1u32;
        loop {
            let candidate = numbered_variant(name, n);
            if fetch_child(conn, parent_id, &candidate).await?.is_none() {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    /// Delete `id` and its subtree inside an open transaction.
    ///
    /// Iterative: a DFS pass collects the subtree, then rows are removed in
    /// reverse (children before parents). Returns digests whose refcount
    /// reached zero.
    async fn delete_subtree_in(
        conn: &mut SqliteConnection,
        id: i64,
    ) -> MetadataResult<Vec<String>> {
        let root = fetch_node(conn, id)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("node {id}")))?;

        let mut stack = vec![root];
        let mut order = Vec::new();
        while let Some(node) = stack.pop() {
            if node.is_folder {
                stack.extend(fetch_children(conn, node.id).await?);
            }
            order.push(node);
        }

        let mut unreferenced = Vec::new();
        for node in order.iter().rev() {
            if let Some(digest) = &node.digest
                && decrement_blob(conn, digest).await? == 0
            {
                unreferenced.push(digest.clone());
            }
            sqlx::query("DELETE FROM nodes WHERE id = ?")
                .bind(node.id)
                .execute(&mut *conn)
                .await?;
        }
        Ok(unreferenced)
    }

    // -------------------------------------------------------------------------
    // Repository implementations
    // -------------------------------------------------------------------------

    #[async_trait]
    impl NodeRepo for SqliteCatalog {
        async fn get_node(&self, id: i64) -> MetadataResult<Option<NodeRow>> {
            let row = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_child(&self, parent_id: i64, name: &str) -> MetadataResult<Option<NodeRow>> {
            let row = sqlx::query_as::<_, NodeRow>(
                "SELECT * FROM nodes WHERE parent_id = ? AND name = ?",
            )
            .bind(parent_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_children(&self, parent_id: i64) -> MetadataResult<Vec<NodeRow>> {
            let rows =
                sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE parent_id = ? ORDER BY id")
                    .bind(parent_id)
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows)
        }

        async fn insert_folder(
            &self,
            parent_id: i64,
            name: &str,
            now_ms: i64,
        ) -> MetadataResult<i64> {
            let mut tx = self.pool.begin().await?;
            ensure_parent_folder(&mut tx, parent_id).await?;
            if fetch_child(&mut tx, parent_id, name).await?.is_some() {
                return Err(MetadataError::NameConflict(format!(
                    "node with same name already exists: {name}"
                )));
            }
            let id = insert_folder_row(&mut tx, parent_id, name, now_ms).await?;
            tx.commit().await?;
            Ok(id)
        }

        async fn rename_node(&self, id: i64, new_name: &str) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            let node = fetch_node(&mut tx, id)
                .await?
                .ok_or_else(|| MetadataError::NotFound(format!("node {id}")))?;

            if node.name == new_name {
                return Ok(());
            }

            if fetch_child(&mut tx, node.parent_id, new_name)
                .await?
                .is_some()
            {
                return Err(MetadataError::NameConflict(format!(
                    "node with same name already exists: {new_name}"
                )));
            }

            sqlx::query("UPDATE nodes SET name = ? WHERE id = ?")
                .bind(new_name)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(())
        }

        async fn increment_download_count(&self, id: i64) -> MetadataResult<()> {
            let result =
                sqlx::query("UPDATE nodes SET download_count = download_count + 1 WHERE id = ?")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("node {id}")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BlobRepo for SqliteCatalog {
        async fn lookup_blob(&self, digest: &str) -> MetadataResult<Option<BlobRow>> {
            let row = sqlx::query_as::<_, BlobRow>("SELECT * FROM blobs WHERE digest = ?")
                .bind(digest)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn delete_unreferenced_blobs(&self) -> MetadataResult<Vec<String>> {
            let mut tx = self.pool.begin().await?;
            let digests: Vec<String> =
                sqlx::query_scalar("SELECT digest FROM blobs WHERE refcount <= 0")
                    .fetch_all(&mut *tx)
                    .await?;
            if !digests.is_empty() {
                sqlx::query("DELETE FROM blobs WHERE refcount <= 0")
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok(digests)
        }
    }

    #[async_trait]
    impl TreeRepo for SqliteCatalog {
        async fn commit_file(
            &self,
            parent_id: i64,
            name: &str,
            digest: &str,
            size: i64,
            now_ms: i64,
        ) -> MetadataResult<FileCommit> {
            let mut tx = self.pool.begin().await?;
            ensure_parent_folder(&mut tx, parent_id).await?;

            let sibling = fetch_child(&mut tx, parent_id, name).await?;
            let commit = match sibling {
                None => {
                    let refcount = insert_or_increment_blob(&mut tx, digest, size).await?;
                    let node_id =
                        insert_file_row(&mut tx, parent_id, name, digest, size, now_ms).await?;
                    FileCommit {
                        node_id,
                        parent_id,
                        name: name.to_string(),
                        digest: digest.to_string(),
                        size,
                        disposition: CommitDisposition::Created,
                        needs_placement: refcount == 1,
                        unreferenced: Vec::new(),
                    }
                }
                Some(sibling) if sibling.is_folder => {
                    return Err(MetadataError::NameConflict(format!(
                        "folder with same name already exists: {name}"
                    )));
                }
                Some(sibling) if sibling.digest.as_deref() == Some(digest) => FileCommit {
                    node_id: sibling.id,
                    parent_id,
                    name: name.to_string(),
                    digest: digest.to_string(),
                    size,
                    disposition: CommitDisposition::Duplicate,
                    needs_placement: false,
                    unreferenced: Vec::new(),
                },
                Some(sibling) => {
                    let previous_digest = sibling.digest.clone().ok_or_else(|| {
                        MetadataError::Internal(format!("file node {} has no digest", sibling.id))
                    })?;
                    let old_refcount = decrement_blob(&mut tx, &previous_digest).await?;
                    let refcount = insert_or_increment_blob(&mut tx, digest, size).await?;
                    update_file_row(&mut tx, sibling.id, digest, size, now_ms).await?;
                    FileCommit {
                        node_id: sibling.id,
                        parent_id,
                        name: name.to_string(),
                        digest: digest.to_string(),
                        size,
                        disposition: CommitDisposition::Replaced {
                            previous_digest: previous_digest.clone(),
                            previous_size: sibling.size,
                            previous_upload_time: sibling.upload_time,
                        },
                        needs_placement: refcount == 1,
                        unreferenced: if old_refcount == 0 {
                            vec![previous_digest]
                        } else {
                            Vec::new()
                        },
                    }
                }
            };
            tx.commit().await?;
            Ok(commit)
        }

        async fn revoke_commit(&self, commit: &FileCommit) -> MetadataResult<()> {
            match &commit.disposition {
                CommitDisposition::Duplicate => Ok(()),
                CommitDisposition::Created => {
                    let mut tx = self.pool.begin().await?;
                    if let Some(node) = fetch_node(&mut tx, commit.node_id).await? {
                        if let Some(digest) = &node.digest {
                            decrement_blob(&mut tx, digest).await?;
                        }
                        sqlx::query("DELETE FROM nodes WHERE id = ?")
                            .bind(node.id)
                            .execute(&mut *tx)
                            .await?;
                    }
                    tx.commit().await?;
                    Ok(())
                }
                CommitDisposition::Replaced {
                    previous_digest,
                    previous_size,
                    previous_upload_time,
                } => {
                    let mut tx = self.pool.begin().await?;
                    decrement_blob(&mut tx, &commit.digest).await?;
                    // Re-inserts the record if the overwrite had deleted it;
                    // the backing file is still on disk because unreferenced
                    // files are only removed after placement succeeds.
                    insert_or_increment_blob(&mut tx, previous_digest, *previous_size).await?;
                    update_file_row(
                        &mut tx,
                        commit.node_id,
                        previous_digest,
                        *previous_size,
                        *previous_upload_time,
                    )
                    .await?;
                    tx.commit().await?;
                    Ok(())
                }
            }
        }

        async fn delete_subtree(&self, id: i64) -> MetadataResult<Vec<String>> {
            let mut tx = self.pool.begin().await?;
            let unreferenced = delete_subtree_in(&mut tx, id).await?;
            tx.commit().await?;
            Ok(unreferenced)
        }

        async fn move_node(
            &self,
            id: i64,
            new_parent_id: i64,
            new_name: Option<&str>,
            strategy: ConflictStrategy,
        ) -> MetadataResult<MoveOutcome> {
            let mut tx = self.pool.begin().await?;
            let source = fetch_node(&mut tx, id)
                .await?
                .ok_or_else(|| MetadataError::NotFound(format!("node {id}")))?;
            ensure_parent_folder(&mut tx, new_parent_id).await?;

            let requested = new_name.unwrap_or(&source.name);
            if source.parent_id == new_parent_id && source.name == requested {
                return Err(MetadataError::BadTarget(
                    "source and destination are the same".to_string(),
                ));
            }

            ensure_no_cycle(&mut tx, id, new_parent_id).await?;

            let mut final_name = requested.to_string();
            let mut unreferenced = Vec::new();
            if let Some(conflict) = fetch_child(&mut tx, new_parent_id, requested).await? {
                match strategy {
                    ConflictStrategy::Fail => {
                        return Err(MetadataError::NameConflict(format!(
                            "node with same name already exists in target: {requested}"
                        )));
                    }
                    ConflictStrategy::Rename => {
                        final_name = pick_free_name(&mut tx, new_parent_id, requested).await?;
                    }
                    ConflictStrategy::Overwrite => {
                        if source.is_folder || conflict.is_folder {
                            return Err(MetadataError::BadTarget(
                                "cannot overwrite a folder or with a folder".to_string(),
                            ));
                        }
                        unreferenced = delete_subtree_in(&mut tx, conflict.id).await?;
                    }
                }
            }

            sqlx::query("UPDATE nodes SET parent_id = ?, name = ? WHERE id = ?")
                .bind(new_parent_id)
                .bind(&final_name)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            Ok(MoveOutcome {
                node_id: id,
                final_name,
                unreferenced,
            })
        }

        async fn copy_node(
            &self,
            id: i64,
            new_parent_id: i64,
            strategy: ConflictStrategy,
            now_ms: i64,
        ) -> MetadataResult<CopyOutcome> {
            let mut tx = self.pool.begin().await?;
            let source = fetch_node(&mut tx, id)
                .await?
                .ok_or_else(|| MetadataError::NotFound(format!("node {id}")))?;
            ensure_parent_folder(&mut tx, new_parent_id).await?;

            // A folder copied into its own subtree would re-visit its output.
            if source.is_folder {
                ensure_no_cycle(&mut tx, id, new_parent_id).await?;
            }

            let mut target_name = source.name.clone();
            let mut unreferenced = Vec::new();
            if let Some(conflict) = fetch_child(&mut tx, new_parent_id, &target_name).await? {
                match strategy {
                    ConflictStrategy::Fail => {
                        return Err(MetadataError::NameConflict(format!(
                            "node with same name already exists in target: {target_name}"
                        )));
                    }
                    ConflictStrategy::Rename => {
                        target_name = pick_free_name(&mut tx, new_parent_id, &target_name).await?;
                    }
                    ConflictStrategy::Overwrite => {
                        if conflict.id == source.id {
                            return Err(MetadataError::BadTarget(
                                "cannot overwrite a node with itself".to_string(),
                            ));
                        }
                        if source.is_folder || conflict.is_folder {
                            return Err(MetadataError::BadTarget(
                                "cannot overwrite a folder or with a folder".to_string(),
                            ));
                        }

                        // File over file: rewrite the conflicting node in
                        // place instead of delete-and-recreate.
                        let source_digest = source.digest.clone().ok_or_else(|| {
                            MetadataError::Internal(format!("file node {id} has no digest"))
                        })?;
                        if source.digest != conflict.digest {
                            let old = conflict.digest.clone().ok_or_else(|| {
                                MetadataError::Internal(format!(
                                    "file node {} has no digest",
                                    conflict.id
                                ))
                            })?;
                            if decrement_blob(&mut tx, &old).await? == 0 {
                                unreferenced.push(old);
                            }
                            insert_or_increment_blob(&mut tx, &source_digest, source.size).await?;
                        }
                        update_file_row(&mut tx, conflict.id, &source_digest, source.size, now_ms)
                            .await?;
                        tx.commit().await?;
                        return Ok(CopyOutcome {
                            node_id: conflict.id,
                            final_name: target_name,
                            unreferenced,
                        });
                    }
                }
            }

            // Iterative pre-order copy with an explicit stack.
            let mut root_id = None;
            let mut stack = vec![(id, new_parent_id, target_name.clone())];
            while let Some((src_id, dst_parent, name)) = stack.pop() {
                let Some(node) = fetch_node(&mut tx, src_id).await? else {
                    continue;
                };
                let new_id = if node.is_file() {
                    let digest = node.digest.as_deref().ok_or_else(|| {
                        MetadataError::Internal(format!("file node {src_id} has no digest"))
                    })?;
                    insert_or_increment_blob(&mut tx, digest, node.size).await?;
                    insert_file_row(&mut tx, dst_parent, &name, digest, node.size, now_ms).await?
                } else {
                    let folder_id = insert_folder_row(&mut tx, dst_parent, &name, now_ms).await?;
                    for child in fetch_children(&mut tx, src_id).await? {
                        stack.push((child.id, folder_id, child.name));
                    }
                    folder_id
                };
                root_id.get_or_insert(new_id);
            }
            tx.commit().await?;

            Ok(CopyOutcome {
                node_id: root_id
                    .ok_or_else(|| MetadataError::Internal("copy produced no nodes".to_string()))?,
                final_name: target_name,
                unreferenced,
            })
        }
    }
}
