//! Document ingestion: single uploads and rate-limited batch jobs.
//!
//! Both paths end in the same place: bytes go to the blob store once, then a
//! link is registered against the returned storage reference.

use crate::{
    models::link::{Link, NewLink},
    services::{
        api_keys::ApiKeyStore,
        blob_store::{BlobError, BlobStore},
        link_registry::{LinkRegistry, RegistryError},
        rate_limiter::{RateLimitError, SlidingWindowLimiter},
    },
};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Largest document accepted from either ingestion path.
pub const MAX_DOCUMENT_BYTES: usize = 50 * 1024 * 1024;

/// Attempts at finding an unused short link id.
const ID_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid upload: {0}")]
    InvalidUpload(String),
    #[error("invalid API key")]
    UnknownApiKey,
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type IngestResult<T> = Result<T, IngestError>;

/// One entry of a batch request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub filename: Option<String>,
    pub file_url: Option<String>,
    pub lender: Option<String>,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub filename: String,
    pub link_id: String,
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct IngestService {
    registry: LinkRegistry,
    blobs: Arc<dyn BlobStore>,
    api_keys: ApiKeyStore,
    limiter: SlidingWindowLimiter,
    http: reqwest::Client,
    public_url: String,
}

impl IngestService {
    pub fn new(
        registry: LinkRegistry,
        blobs: Arc<dyn BlobStore>,
        api_keys: ApiKeyStore,
        limiter: SlidingWindowLimiter,
        public_url: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            registry,
            blobs,
            api_keys,
            limiter,
            http,
            public_url: public_url.into(),
        }
    }

    /// Viewer page for a link.
    pub fn viewer_url(&self, link_id: &str) -> String {
        format!("{}/view/{}", self.public_url.trim_end_matches('/'), link_id)
    }

    /// Store `bytes` and register a link owned by `owner_id`.
    ///
    /// If registration fails the freshly written blob is removed again.
    pub async fn upload(
        &self,
        owner_id: &str,
        filename: &str,
        bytes: Bytes,
        lender: Option<String>,
        expires_at: Option<i64>,
    ) -> IngestResult<Link> {
        if bytes.is_empty() {
            return Err(IngestError::InvalidUpload("file is empty".into()));
        }
        if bytes.len() > MAX_DOCUMENT_BYTES {
            return Err(IngestError::InvalidUpload(format!(
                "file exceeds {} bytes",
                MAX_DOCUMENT_BYTES
            )));
        }
        let filename = filename.trim();
        let filename = if filename.is_empty() { "document.pdf" } else { filename };
        let lender = lender
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());

        let storage_ref = self.blobs.put(owner_id, filename, bytes).await?;

        let mut last_err = None;
        for _ in 0..ID_ATTEMPTS {
            let new = NewLink {
                id: short_id(),
                owner_id: owner_id.to_string(),
                storage_ref: storage_ref.clone(),
                filename: filename.to_string(),
                expires_at,
                lender: lender.clone(),
            };
            match self.registry.create(new).await {
                Ok(link) => return Ok(link),
                Err(RegistryError::DuplicateId(id)) => {
                    warn!(link_id = %id, "short link id collision, retrying");
                    last_err = Some(RegistryError::DuplicateId(id));
                }
                Err(err) => {
                    last_err = Some(err);
                    break;
                }
            }
        }

        if let Err(err) = self.blobs.delete(&storage_ref).await {
            warn!(storage_ref = %storage_ref, error = %err, "failed to remove orphaned blob");
        }
        Err(last_err
            .map(IngestError::from)
            .unwrap_or_else(|| IngestError::InvalidUpload("could not allocate link id".into())))
    }

    /// Fetch remote documents and create a link for each.
    ///
    /// The whole batch is charged against the caller's rolling quota before
    /// any fetch starts. Jobs with missing fields or failed fetches are
    /// skipped.
    pub async fn run_batch(&self, api_key: &str, jobs: Vec<BatchJob>) -> IngestResult<Vec<BatchOutcome>> {
        let owner_id = self
            .api_keys
            .owner_for(api_key)
            .await?
            .ok_or(IngestError::UnknownApiKey)?;
        self.limiter.acquire(api_key, jobs.len() as u32).await?;

        let mut results = Vec::new();
        for job in jobs {
            let (Some(filename), Some(file_url)) = (job.filename, job.file_url) else {
                continue;
            };
            let bytes = match self.fetch(&file_url).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(file_url = %file_url, error = %err, "skipping batch job");
                    continue;
                }
            };
            match self
                .upload(&owner_id, &filename, bytes, job.lender, job.expires_at)
                .await
            {
                Ok(link) => results.push(BatchOutcome {
                    url: self.viewer_url(&link.id),
                    link_id: link.id,
                    filename: link.filename,
                }),
                Err(err) => warn!(file_url = %file_url, error = %err, "batch job failed"),
            }
        }

        info!(owner_id = %owner_id, created = results.len(), "batch ingestion finished");
        Ok(results)
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, String> {
        fetch_limited(&self.http, url, MAX_DOCUMENT_BYTES).await
    }
}

/// Download `url`, giving up as soon as more than `limit` bytes arrive,
/// whether or not the remote announced a length.
async fn fetch_limited(http: &reqwest::Client, url: &str, limit: usize) -> Result<Bytes, String> {
    let mut response = http.get(url).send().await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("remote returned {}", response.status()));
    }
    if response
        .content_length()
        .is_some_and(|len| len > limit as u64)
    {
        return Err("remote file too large".into());
    }

    let mut body = BytesMut::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
        if body.len() + chunk.len() > limit {
            return Err("remote file too large".into());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

/// Eight hex characters from a random UUID.
fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, services::local_blob_store::LocalBlobStore};

    async fn service(quota: u32) -> (IngestService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(dir.path()).await.unwrap());
        let pool = db::memory_pool().await.unwrap();
        let registry = LinkRegistry::new(pool.clone(), blobs.clone());
        let limiter = SlidingWindowLimiter::new(pool.clone(), quota, Duration::from_secs(60));
        let service = IngestService::new(
            registry,
            blobs,
            ApiKeyStore::new(pool),
            limiter,
            "https://docs.example.com/",
        );
        (service, dir)
    }

    #[tokio::test]
    async fn upload_registers_link_with_trimmed_lender() {
        let (service, _dir) = service(60).await;
        let link = service
            .upload(
                "owner-1",
                "deck.pdf",
                Bytes::from_static(b"%PDF-1.7"),
                Some("  bank  ".into()),
                Some(42),
            )
            .await
            .unwrap();
        assert_eq!(link.id.len(), 8);
        assert_eq!(link.lender.as_deref(), Some("bank"));
        assert_eq!(link.expires_at, Some(42));
        assert!(service.blobs.exists(&link.storage_ref).await.unwrap());
        assert_eq!(
            service.viewer_url(&link.id),
            format!("https://docs.example.com/view/{}", link.id)
        );
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let (service, _dir) = service(60).await;
        let err = service
            .upload("owner-1", "deck.pdf", Bytes::new(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidUpload(_)));
    }

    #[tokio::test]
    async fn batch_requires_known_key_and_quota() {
        let (service, _dir) = service(2).await;
        assert!(matches!(
            service.run_batch("unknown", vec![]).await,
            Err(IngestError::UnknownApiKey)
        ));

        let key = service.api_keys.issue("owner-1").await.unwrap();
        let incomplete = BatchJob {
            filename: None,
            file_url: None,
            lender: None,
            expires_at: None,
        };
        let results = service
            .run_batch(&key, vec![incomplete.clone(), incomplete.clone()])
            .await
            .unwrap();
        assert!(results.is_empty());

        assert!(matches!(
            service.run_batch(&key, vec![incomplete]).await,
            Err(IngestError::RateLimited(RateLimitError::Exceeded { .. }))
        ));
    }

    /// Serve `chunks` as a length-less (chunked) body and return its URL.
    async fn serve_chunked(chunks: Vec<&'static [u8]>) -> String {
        use axum::{Router, body::Body, routing::get};

        let app = Router::new().route(
            "/doc.pdf",
            get(move || {
                let chunks = chunks.clone();
                async move {
                    let stream = futures::stream::iter(
                        chunks
                            .into_iter()
                            .map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c))),
                    );
                    Body::from_stream(stream)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/doc.pdf")
    }

    #[tokio::test]
    async fn chunked_download_stops_at_limit() {
        let url = serve_chunked(vec![b"%PDF-", b"0123456789", b"0123456789"]).await;
        let http = reqwest::Client::new();

        let err = fetch_limited(&http, &url, 16).await.unwrap_err();
        assert!(err.contains("too large"), "{err}");

        let body = fetch_limited(&http, &url, 25).await.unwrap();
        assert_eq!(&body[..], b"%PDF-01234567890123456789");
    }
}
