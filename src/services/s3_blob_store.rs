//! Durable object storage backed by an S3-compatible bucket.
//!
//! Storage references are `s3://{bucket}/{key}`. Network failures are surfaced
//! as [`BlobError::Upstream`] and never retried here.

use crate::services::blob_store::{
    BackendKind, BlobError, BlobResult, BlobStat, BlobStore, ByteStream, sanitize_component,
};
use async_trait::async_trait;
use aws_sdk_s3::{Client, primitives::ByteStream as S3Body};
use bytes::Bytes;
use chrono::Utc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

const S3_SCHEME: &str = "s3://";

#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    /// Build a client from the default AWS configuration chain (environment,
    /// profile, instance metadata).
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let sdk_config = aws_config::load_from_env().await;
        info!(bucket = %bucket, region = ?sdk_config.region(), "Initializing S3 blob store");
        Self {
            client: Client::new(&sdk_config),
            bucket,
        }
    }

    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Split `s3://bucket/key`, rejecting references to other buckets.
    fn key_for<'a>(&self, storage_ref: &'a str) -> BlobResult<&'a str> {
        let (bucket, key) = storage_ref
            .strip_prefix(S3_SCHEME)
            .and_then(|rest| rest.split_once('/'))
            .ok_or_else(|| BlobError::InvalidRef(storage_ref.to_string()))?;
        if bucket != self.bucket || key.is_empty() {
            return Err(BlobError::InvalidRef(storage_ref.to_string()));
        }
        Ok(key)
    }

    fn upstream(op: &str, err: impl std::fmt::Display) -> BlobError {
        BlobError::Upstream(format!("{op}: {err}"))
    }
}

/// Build the `Range` header value sent to the object store.
fn range_header(start: Option<u64>, end: Option<u64>) -> Option<String> {
    match (start, end) {
        (None, None) => None,
        (start, Some(end)) => Some(format!("bytes={}-{}", start.unwrap_or(0), end)),
        (Some(start), None) => Some(format!("bytes={start}-")),
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn kind(&self) -> BackendKind {
        BackendKind::S3
    }

    async fn put(&self, owner_id: &str, filename: &str, bytes: Bytes) -> BlobResult<String> {
        if owner_id.trim().is_empty() {
            return Err(BlobError::InvalidName("owner id is empty".into()));
        }
        let key = format!(
            "pdfs/{}/{}-{}-{}",
            sanitize_component(owner_id),
            Utc::now().timestamp_millis(),
            &Uuid::new_v4().simple().to_string()[..8],
            sanitize_component(filename)
        );
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/pdf")
            .body(S3Body::from(bytes))
            .send()
            .await
            .map_err(|err| Self::upstream("put_object", err))?;

        debug!(bucket = %self.bucket, key = %key, size, "stored blob in object storage");
        Ok(format!("{}{}/{}", S3_SCHEME, self.bucket, key))
    }

    async fn stat(&self, storage_ref: &str) -> BlobResult<BlobStat> {
        let key = self.key_for(storage_ref)?;
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    BlobError::NotFound(storage_ref.to_string())
                } else {
                    Self::upstream("head_object", err)
                }
            })?;

        Ok(BlobStat {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            exists: true,
        })
    }

    async fn open_range(
        &self,
        storage_ref: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> BlobResult<ByteStream> {
        let key = self.key_for(storage_ref)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_range(range_header(start, end))
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    BlobError::NotFound(storage_ref.to_string())
                } else {
                    Self::upstream("get_object", err)
                }
            })?;

        Ok(Box::pin(ReaderStream::new(output.body.into_async_read())))
    }

    async fn delete(&self, storage_ref: &str) -> BlobResult<()> {
        let key = self.key_for(storage_ref)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| Self::upstream("delete_object", err))?;
        Ok(())
    }

    async fn health_check(&self) -> BlobResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| Self::upstream("head_bucket", err))?;
        Ok(())
    }
}
