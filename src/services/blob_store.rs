//! Backend-agnostic blob storage.
//!
//! The rest of the service only ever talks to [`BlobStore`]. Which backend sits
//! behind it (local sharded disk or durable object storage) is decided once at
//! startup and injected as `Arc<dyn BlobStore>`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use std::{fmt, io, pin::Pin};
use thiserror::Error;

/// A byte stream produced by [`BlobStore::open_range`].
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("storage reference `{0}` is not valid for this backend")]
    InvalidRef(String),
    #[error("invalid blob name: {0}")]
    InvalidName(String),
    #[error("storage backend failure: {0}")]
    Upstream(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Which strategy is serving bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Ephemeral local filesystem, used for development and demos.
    Local,
    /// Durable S3-compatible object storage.
    S3,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::S3 => "s3",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`BlobStore::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlobStat {
    pub size: u64,
    pub exists: bool,
}

#[async_trait]
pub trait BlobStore: Send + Sync + fmt::Debug + 'static {
    /// Backend served by this store.
    fn kind(&self) -> BackendKind;

    /// Write `bytes` once and return an immutable storage reference.
    async fn put(&self, owner_id: &str, filename: &str, bytes: Bytes) -> BlobResult<String>;

    /// Size of the referenced object. Missing objects fail with `NotFound`.
    async fn stat(&self, storage_ref: &str) -> BlobResult<BlobStat>;

    /// Stream bytes `start..=end`.
    ///
    /// Both omitted means the full object; `end` omitted means "to end of
    /// object". Callers clamp `end` to `size - 1` before calling.
    async fn open_range(
        &self,
        storage_ref: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> BlobResult<ByteStream>;

    /// Remove the referenced object. Removing a missing object is not an error.
    async fn delete(&self, storage_ref: &str) -> BlobResult<()>;

    /// Cheap reachability probe used by `/readyz`.
    async fn health_check(&self) -> BlobResult<()>;

    /// Convenience wrapper over [`BlobStore::stat`] that maps `NotFound` to `false`.
    async fn exists(&self, storage_ref: &str) -> BlobResult<bool> {
        match self.stat(storage_ref).await {
            Ok(stat) => Ok(stat.exists),
            Err(BlobError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Reduce an uploaded filename to `[A-Za-z0-9._-]`, replacing everything else
/// with `_`. Used for on-disk names, object keys and response headers.
pub fn sanitize_component(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.to_string()
    }
}
