//! Content-addressed blob directory.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use hyperfs_core::ContentDigest;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Stream of body chunks for a blob read.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// An open handle onto a stored blob.
pub struct BlobHandle {
    /// Open file positioned at the start of the blob.
    pub file: fs::File,
    /// Total blob size in bytes.
    pub size: u64,
}

/// Digest-keyed blob storage.
///
/// The store only manages bytes; reference counts live in the catalog and
/// govern when `remove` is called.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Whether a blob file exists for the digest.
    async fn exists(&self, digest: &ContentDigest) -> StorageResult<bool>;

    /// Open a blob for reading.
    async fn open(&self, digest: &ContentDigest) -> StorageResult<BlobHandle>;

    /// Stream the full blob.
    async fn read(&self, digest: &ContentDigest) -> StorageResult<ByteStream>;

    /// Stream `len` bytes starting at `start`.
    async fn read_range(
        &self,
        digest: &ContentDigest,
        start: u64,
        len: u64,
    ) -> StorageResult<ByteStream>;

    /// Move a finished upload temp file into place as the blob for `digest`.
    ///
    /// A target that already exists is benign: concurrent uploads of
    /// identical content race in post-commit placement, and the loser's
    /// bytes are identical by construction. The temp file is discarded in
    /// that case.
    async fn place(&self, temp_path: &Path, digest: &ContentDigest) -> StorageResult<()>;

    /// Remove the blob file. Missing files are ignored.
    async fn remove(&self, digest: &ContentDigest) -> StorageResult<()>;

    /// List the digests of every blob file in the store.
    async fn list(&self) -> StorageResult<Vec<ContentDigest>>;

    /// Verify the store root is accessible.
    async fn health_check(&self) -> StorageResult<()>;
}

/// Local filesystem blob store: one file per unique content blob, named by
/// its 64-char lowercase hex digest.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a new blob store rooted at `root`, creating it if missing.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Full path of the blob file for a digest.
    pub fn blob_path(&self, digest: &ContentDigest) -> PathBuf {
        self.root.join(digest.to_hex())
    }

    async fn open_file(&self, digest: &ContentDigest) -> StorageResult<fs::File> {
        fs::File::open(self.blob_path(digest)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(digest.to_hex())
            } else {
                StorageError::Io(e)
            }
        })
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    #[instrument(skip(self), fields(digest = %digest))]
    async fn exists(&self, digest: &ContentDigest) -> StorageResult<bool> {
        fs::try_exists(self.blob_path(digest))
            .await
            .map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(digest = %digest))]
    async fn open(&self, digest: &ContentDigest) -> StorageResult<BlobHandle> {
        let file = self.open_file(digest).await?;
        let size = file.metadata().await?.len();
        Ok(BlobHandle { file, size })
    }

    #[instrument(skip(self), fields(digest = %digest))]
    async fn read(&self, digest: &ContentDigest) -> StorageResult<ByteStream> {
        let file = self.open_file(digest).await?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    #[instrument(skip(self), fields(digest = %digest))]
    async fn read_range(
        &self,
        digest: &ContentDigest,
        start: u64,
        len: u64,
    ) -> StorageResult<ByteStream> {
        let mut file = self.open_file(digest).await?;
        let size = file.metadata().await?.len();
        if start.checked_add(len).is_none_or(|end| end > size) {
            return Err(StorageError::InvalidRange(format!(
                "{start}+{len} exceeds blob size {size}"
            )));
        }
        file.seek(std::io::SeekFrom::Start(start)).await?;
        Ok(Box::pin(ReaderStream::new(file.take(len))))
    }

    #[instrument(skip(self, temp_path), fields(digest = %digest))]
    async fn place(&self, temp_path: &Path, digest: &ContentDigest) -> StorageResult<()> {
        let target = self.blob_path(digest);

        if fs::try_exists(&target).await? {
            let _ = fs::remove_file(temp_path).await;
            return Ok(());
        }

        // Flush the temp file to disk before the rename makes it visible.
        {
            let file = fs::File::open(temp_path).await?;
            file.sync_all().await?;
        }
        fs::rename(temp_path, &target).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(digest = %digest))]
    async fn remove(&self, digest: &ContentDigest) -> StorageResult<()> {
        match fs::remove_file(self.blob_path(digest)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self))]
    async fn list(&self) -> StorageResult<Vec<ContentDigest>> {
        let mut digests = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(name) = name.to_str()
                && let Ok(digest) = ContentDigest::from_hex(name)
            {
                digests.push(digest);
            }
        }
        Ok(digests)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;
        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }
        Ok(())
    }
}
