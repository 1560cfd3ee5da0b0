//! Streaming upload sessions.

use crate::error::{StorageError, StorageResult};
use hyperfs_core::{ContentDigest, DigestHasher};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Result of a finished upload: the temp file and what it contains.
pub struct FinishedUpload {
    /// Temp file holding the uploaded bytes, flushed and closed.
    pub temp_path: PathBuf,
    /// SHA-256 over the full body.
    pub digest: ContentDigest,
    /// Body size in bytes.
    pub size: u64,
}

/// Per-connection upload state: a temp file, an inline hasher, and a byte
/// counter that advance in lockstep over each body chunk.
///
/// Sessions are single-threaded; a failed write poisons the session and the
/// caller must abort it.
pub struct UploadSession {
    temp_path: PathBuf,
    file: Option<fs::File>,
    hasher: DigestHasher,
    received: u64,
}

impl UploadSession {
    /// Start a session with a fresh temp file under `tmp_dir`.
    pub async fn start(tmp_dir: impl AsRef<Path>) -> StorageResult<Self> {
        let tmp_dir = tmp_dir.as_ref();
        fs::create_dir_all(tmp_dir).await?;
        let temp_path = tmp_dir.join(format!("upload_{}.tmp", Uuid::new_v4()));
        let file = fs::File::create(&temp_path).await?;
        Ok(Self {
            temp_path,
            file: Some(file),
            hasher: ContentDigest::hasher(),
            received: 0,
        })
    }

    /// Feed one body chunk: the hasher and the file observe the same bytes.
    pub async fn process_chunk(&mut self, chunk: &[u8]) -> StorageResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StorageError::UploadSession("session already finished".to_string()))?;
        self.hasher.update(chunk);
        file.write_all(chunk).await?;
        self.received += chunk.len() as u64;
        Ok(())
    }

    /// Bytes received so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Flush and close the temp file, yielding the digest and size.
    pub async fn finish(mut self) -> StorageResult<FinishedUpload> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| StorageError::UploadSession("session already finished".to_string()))?;
        if let Err(e) = flush_and_sync(&mut file).await {
            drop(file);
            let _ = std::fs::remove_file(&self.temp_path);
            return Err(e.into());
        }
        drop(file);
        let hasher = std::mem::replace(&mut self.hasher, ContentDigest::hasher());
        Ok(FinishedUpload {
            temp_path: self.temp_path.clone(),
            digest: hasher.finalize(),
            size: self.received,
        })
    }

    /// Abort the session, removing the temp file. I/O failures are absorbed.
    pub async fn abort(mut self) {
        drop(self.file.take());
        if let Err(e) = fs::remove_file(&self.temp_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.temp_path.display(), error = %e, "failed to remove aborted upload temp file");
        }
    }
}

async fn flush_and_sync(file: &mut fs::File) -> std::io::Result<()> {
    file.flush().await?;
    file.sync_all().await
}

/// A session dropped mid-stream (connection loss cancels the handler) still
/// removes its temp file. Finished sessions have already given the file up.
impl Drop for UploadSession {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}
