//! Link Registry: storage of record for shareable documents.

use crate::{
    models::link::{Link, NewLink},
    services::{
        access_ledger,
        blob_store::{BlobError, BlobStore},
        now_millis,
    },
};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

const LINK_COLUMNS: &str =
    "id, owner_id, storage_ref, filename, created_at, expires_at, lender, access_count";

/// Upper bound for `list_by_owner`.
pub const MAX_LIST_LIMIT: i64 = 200;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("link `{0}` not found")]
    NotFound(String),
    #[error("link `{0}` already exists")]
    DuplicateId(String),
    #[error("storage reference `{0}` does not resolve to an existing object")]
    MissingBlob(String),
    #[error("invalid link: {0}")]
    InvalidLink(String),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Durable link metadata plus the atomic access counter.
///
/// Holds the injected blob store so creation can validate the storage
/// reference and deletion can cascade to the payload.
#[derive(Clone, Debug)]
pub struct LinkRegistry {
    db: SqlitePool,
    blobs: Arc<dyn BlobStore>,
}

impl LinkRegistry {
    pub fn new(db: SqlitePool, blobs: Arc<dyn BlobStore>) -> Self {
        Self { db, blobs }
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Register a link. The storage reference must resolve to an existing
    /// object; ids are never reused.
    pub async fn create(&self, new: NewLink) -> RegistryResult<Link> {
        if new.id.trim().is_empty() {
            return Err(RegistryError::InvalidLink("id must not be empty".into()));
        }
        if new.owner_id.trim().is_empty() {
            return Err(RegistryError::InvalidLink("owner id must not be empty".into()));
        }
        if !self.blobs.exists(&new.storage_ref).await? {
            return Err(RegistryError::MissingBlob(new.storage_ref));
        }

        let created_at = now_millis();
        let result = sqlx::query_as::<_, Link>(&format!(
            "INSERT INTO links (id, owner_id, storage_ref, filename, created_at, expires_at, lender, access_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, 0)
             RETURNING {LINK_COLUMNS}"
        ))
        .bind(&new.id)
        .bind(&new.owner_id)
        .bind(&new.storage_ref)
        .bind(&new.filename)
        .bind(created_at)
        .bind(new.expires_at)
        .bind(&new.lender)
        .fetch_one(&self.db)
        .await;

        match result {
            Ok(link) => {
                info!(link_id = %link.id, owner_id = %link.owner_id, "link created");
                Ok(link)
            }
            Err(err) if is_unique_violation(&err) => Err(RegistryError::DuplicateId(new.id)),
            Err(err) => Err(RegistryError::Sqlx(err)),
        }
    }

    pub async fn get(&self, id: &str) -> RegistryResult<Link> {
        sqlx::query_as::<_, Link>(&format!("SELECT {LINK_COLUMNS} FROM links WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Like [`LinkRegistry::get`], but a link past its hard expiry is reported
    /// as not found.
    pub async fn get_active(&self, id: &str) -> RegistryResult<Link> {
        let link = self.get(id).await?;
        if link.is_expired_at(now_millis()) {
            debug!(link_id = %id, "link past its expiry");
            return Err(RegistryError::NotFound(id.to_string()));
        }
        Ok(link)
    }

    /// Newest first; `limit` is clamped to `1..=MAX_LIST_LIMIT`.
    pub async fn list_by_owner(&self, owner_id: &str, limit: i64) -> RegistryResult<Vec<Link>> {
        let rows = sqlx::query_as::<_, Link>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE owner_id = ?
             ORDER BY created_at DESC, rowid DESC LIMIT ?"
        ))
        .bind(owner_id)
        .bind(limit.clamp(1, MAX_LIST_LIMIT))
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// Delete a link, its ledger and its payload.
    ///
    /// Metadata and events go in one transaction. The payload is removed
    /// afterwards; a failure there only leaves an unreachable orphan and is
    /// logged rather than returned.
    pub async fn delete(&self, id: &str) -> RegistryResult<Link> {
        let mut tx = self.db.begin().await?;
        let link = sqlx::query_as::<_, Link>(&format!(
            "DELETE FROM links WHERE id = ? RETURNING {LINK_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let purged = access_ledger::purge_link(&mut *tx, id).await?;
        tx.commit().await?;

        if let Err(err) = self.blobs.delete(&link.storage_ref).await {
            warn!(link_id = %id, storage_ref = %link.storage_ref, error = %err, "failed to delete blob for removed link");
        }
        info!(link_id = %id, events = purged, "link deleted");
        Ok(link)
    }

    /// Atomically bump the access counter; returns the new value.
    pub async fn increment_access_count(&self, id: &str) -> RegistryResult<i64> {
        let mut conn = self.db.acquire().await?;
        increment_in(&mut conn, id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }
}

/// Single-statement counter bump usable inside a caller's transaction.
pub(crate) async fn increment_in(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "UPDATE links SET access_count = access_count + 1 WHERE id = ? RETURNING access_count",
    )
    .bind(id)
    .fetch_optional(conn)
    .await
}

/// Return true if the SQLx error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        models::access_event::{AccessKind, EventDetails},
        services::{access_ledger::AccessLedger, local_blob_store::LocalBlobStore},
    };
    use bytes::Bytes;

    async fn setup() -> (LinkRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(dir.path()).await.unwrap());
        let pool = db::memory_pool().await.unwrap();
        (LinkRegistry::new(pool, blobs), dir)
    }

    async fn new_link(registry: &LinkRegistry, id: &str, owner: &str) -> NewLink {
        let storage_ref = registry
            .blobs()
            .put(owner, "doc.pdf", Bytes::from_static(b"%PDF-1.7"))
            .await
            .unwrap();
        NewLink {
            id: id.to_string(),
            owner_id: owner.to_string(),
            storage_ref,
            filename: "doc.pdf".to_string(),
            expires_at: None,
            lender: Some("acme".to_string()),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (registry, _dir) = setup().await;
        let new = new_link(&registry, "abc12345", "owner-1").await;

        let created = registry.create(new.clone()).await.unwrap();
        assert_eq!(created.access_count, 0);
        assert_eq!(created.lender.as_deref(), Some("acme"));

        let fetched = registry.get("abc12345").await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let (registry, _dir) = setup().await;
        let new = new_link(&registry, "dup00001", "owner-1").await;
        registry.create(new.clone()).await.unwrap();

        let err = registry.create(new).await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId(id) if id == "dup00001"));
    }

    #[tokio::test]
    async fn create_requires_existing_blob() {
        let (registry, _dir) = setup().await;
        let mut new = new_link(&registry, "nobytes1", "owner-1").await;
        registry.blobs().delete(&new.storage_ref).await.unwrap();

        let err = registry.create(new.clone()).await.unwrap_err();
        assert!(matches!(err, RegistryError::MissingBlob(_)));

        new.storage_ref = "ftp://elsewhere/doc.pdf".to_string();
        let err = registry.create(new).await.unwrap_err();
        assert!(matches!(err, RegistryError::Blob(BlobError::InvalidRef(_))));
    }

    #[tokio::test]
    async fn list_by_owner_is_newest_first_and_scoped() {
        let (registry, _dir) = setup().await;
        for id in ["first001", "second02", "third003"] {
            let new = new_link(&registry, id, "owner-1").await;
            registry.create(new).await.unwrap();
        }
        let other = new_link(&registry, "other001", "owner-2").await;
        registry.create(other).await.unwrap();

        let ids: Vec<String> = registry
            .list_by_owner("owner-1", 50)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(ids, vec!["third003", "second02", "first001"]);

        let limited = registry.list_by_owner("owner-1", 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn expired_links_are_hidden_from_get_active() {
        let (registry, _dir) = setup().await;
        let mut new = new_link(&registry, "expired1", "owner-1").await;
        new.expires_at = Some(now_millis() - 1);
        registry.create(new).await.unwrap();

        assert!(registry.get("expired1").await.is_ok());
        assert!(matches!(
            registry.get_active("expired1").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    /// File-backed database with a multi-connection pool, so writers really
    /// race each other.
    async fn setup_shared() -> (LinkRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(dir.path()).await.unwrap());
        let url = format!("sqlite://{}", dir.path().join("meta").join("links.db").display());
        let pool = db::connect(&url).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        (LinkRegistry::new(pool, blobs), dir)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let (registry, _dir) = setup_shared().await;
        let new = new_link(&registry, "counter1", "owner-1").await;
        registry.create(new).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..25 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.increment_access_count("counter1").await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.get("counter1").await.unwrap().access_count, 25);
        assert!(matches!(
            registry.increment_access_count("missing1").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_cascades_to_events_and_blob() {
        let (registry, _dir) = setup().await;
        let new = new_link(&registry, "gone0001", "owner-1").await;
        let link = registry.create(new).await.unwrap();

        let ledger = AccessLedger::new(registry.db.clone());
        ledger
            .append("gone0001", AccessKind::Delivery, EventDetails::default())
            .await
            .unwrap();

        registry.delete("gone0001").await.unwrap();

        assert!(matches!(registry.get("gone0001").await, Err(RegistryError::NotFound(_))));
        assert!(ledger.list_recent("gone0001", 10).await.unwrap().is_empty());
        assert!(!registry.blobs().exists(&link.storage_ref).await.unwrap());
        assert!(matches!(
            registry.delete("gone0001").await,
            Err(RegistryError::NotFound(_))
        ));
    }
}
