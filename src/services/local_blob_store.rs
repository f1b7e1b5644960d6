//! Local filesystem blob store.
//!
//! Payloads live beneath `root/{owner}/{shard}/{shard}/{millis}-{nonce}-{name}`.
//! Storage references are `file://` URIs holding the absolute payload path.
//! Only used where durable object storage is not configured.

use crate::services::blob_store::{
    BackendKind, BlobError, BlobResult, BlobStat, BlobStore, ByteStream, sanitize_component,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Component, Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const FILE_SCHEME: &str = "file://";

#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    /// Canonical root directory for payloads.
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create the root directory if needed and anchor the store there.
    pub async fn new(root: impl Into<PathBuf>) -> BlobResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        let root = fs::canonicalize(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Two-level shard identifiers from MD5(owner/name), keeping directory
    /// fan-out bounded.
    fn shards(owner: &str, name: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", owner, name));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Map a `file://` reference back to a path inside `root`.
    ///
    /// Rejects other schemes, relative paths, `..` components and anything
    /// that escapes the root.
    fn resolve(&self, storage_ref: &str) -> BlobResult<PathBuf> {
        let raw = storage_ref
            .strip_prefix(FILE_SCHEME)
            .ok_or_else(|| BlobError::InvalidRef(storage_ref.to_string()))?;
        let path = PathBuf::from(raw);
        if !path.is_absolute()
            || path.components().any(|c| matches!(c, Component::ParentDir))
            || !path.starts_with(&self.root)
        {
            return Err(BlobError::InvalidRef(storage_ref.to_string()));
        }
        Ok(path)
    }

    fn not_found_or_io(storage_ref: &str, err: io::Error) -> BlobError {
        if err.kind() == ErrorKind::NotFound {
            BlobError::NotFound(storage_ref.to_string())
        } else {
            BlobError::Io(err)
        }
    }

    /// Remove empty directories from `start` up to (not including) `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn put(&self, owner_id: &str, filename: &str, bytes: Bytes) -> BlobResult<String> {
        if owner_id.trim().is_empty() {
            return Err(BlobError::InvalidName("owner id is empty".into()));
        }
        let owner = sanitize_component(owner_id);
        let name = format!(
            "{}-{}-{}",
            Utc::now().timestamp_millis(),
            &Uuid::new_v4().simple().to_string()[..8],
            sanitize_component(filename)
        );
        let (shard_a, shard_b) = Self::shards(&owner, &name);
        let parent = self.root.join(&owner).join(shard_a).join(shard_b);
        fs::create_dir_all(&parent).await?;

        let final_path = parent.join(&name);
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let write = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &final_path).await
        };
        if let Err(err) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }

        debug!(path = %final_path.display(), size = bytes.len(), "stored blob on local disk");
        Ok(format!("{}{}", FILE_SCHEME, final_path.display()))
    }

    async fn stat(&self, storage_ref: &str) -> BlobResult<BlobStat> {
        let path = self.resolve(storage_ref)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|err| Self::not_found_or_io(storage_ref, err))?;
        if !meta.is_file() {
            return Err(BlobError::NotFound(storage_ref.to_string()));
        }
        Ok(BlobStat {
            size: meta.len(),
            exists: true,
        })
    }

    async fn open_range(
        &self,
        storage_ref: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> BlobResult<ByteStream> {
        let path = self.resolve(storage_ref)?;
        let mut file = File::open(&path)
            .await
            .map_err(|err| Self::not_found_or_io(storage_ref, err))?;

        let start = start.unwrap_or(0);
        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }

        let stream: ByteStream = match end {
            Some(end) if end < start => {
                return Err(BlobError::Io(io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("range end {end} precedes start {start}"),
                )));
            }
            Some(end) => Box::pin(ReaderStream::new(file.take(end - start + 1))),
            None => Box::pin(ReaderStream::new(file)),
        };
        Ok(stream)
    }

    async fn delete(&self, storage_ref: &str) -> BlobResult<()> {
        let path = self.resolve(storage_ref)?;
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed blob {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", path.display());
            }
            Err(err) => return Err(BlobError::Io(err)),
        }
        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent, &self.root).await;
        }
        Ok(())
    }

    /// Write, read back and remove a probe file under the root.
    async fn health_check(&self) -> BlobResult<()> {
        let probe = self.root.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&probe, b"readyz").await?;
        let read_back = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        if read_back? != b"readyz" {
            return Err(BlobError::Upstream("probe file content mismatch".into()));
        }
        Ok(())
    }
}
