//! Access Ledger: append-only, per-link event log.
//!
//! Every append also bumps the link's access counter in the same transaction,
//! so the counter never drifts from the number of stored events.

use crate::{
    models::access_event::{AccessEvent, AccessKind, EventDetails},
    services::{link_registry, now_millis},
};
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const EVENT_COLUMNS: &str =
    "id, link_id, kind, at, ip, country, user_agent, identity, fingerprint";

/// Free-text fields are clipped to this many characters before storage.
const MAX_FIELD_LEN: usize = 512;

/// Upper bound for `list_recent`.
pub const MAX_RECENT_LIMIT: i64 = 1000;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("link `{0}` not found")]
    LinkNotFound(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Clone, Debug)]
pub struct AccessLedger {
    db: SqlitePool,
}

impl AccessLedger {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Append an event stamped with the current time.
    pub async fn append(
        &self,
        link_id: &str,
        kind: AccessKind,
        details: EventDetails,
    ) -> LedgerResult<AccessEvent> {
        self.append_at(link_id, kind, details, now_millis()).await
    }

    /// Pure insert at `at`; no deduplication. Fails if the link is unknown.
    pub async fn append_at(
        &self,
        link_id: &str,
        kind: AccessKind,
        details: EventDetails,
        at: i64,
    ) -> LedgerResult<AccessEvent> {
        let event = AccessEvent {
            id: Uuid::new_v4().to_string(),
            link_id: link_id.to_string(),
            kind,
            at,
            ip: clip(details.ip),
            country: clip(details.country),
            user_agent: clip(details.user_agent),
            identity: clip(details.identity),
            fingerprint: clip(details.fingerprint),
        };

        let mut tx = self.db.begin().await?;
        if link_registry::increment_in(&mut *tx, link_id).await?.is_none() {
            return Err(LedgerError::LinkNotFound(link_id.to_string()));
        }
        sqlx::query(&format!(
            "INSERT INTO access_events ({EVENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&event.id)
        .bind(&event.link_id)
        .bind(event.kind)
        .bind(event.at)
        .bind(&event.ip)
        .bind(&event.country)
        .bind(&event.user_agent)
        .bind(&event.identity)
        .bind(&event.fingerprint)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(link_id = %link_id, kind = ?kind, ip = ?event.ip, "access event appended");
        Ok(event)
    }

    /// Newest first; `limit` is clamped to `1..=MAX_RECENT_LIMIT`.
    pub async fn list_recent(&self, link_id: &str, limit: i64) -> LedgerResult<Vec<AccessEvent>> {
        let rows = sqlx::query_as::<_, AccessEvent>(&format!(
            "SELECT {EVENT_COLUMNS} FROM access_events WHERE link_id = ?
             ORDER BY at DESC, rowid DESC LIMIT ?"
        ))
        .bind(link_id)
        .bind(limit.clamp(1, MAX_RECENT_LIMIT))
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}

/// Remove every event of a link. Only called from link deletion.
pub(crate) async fn purge_link(conn: &mut SqliteConnection, link_id: &str) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM access_events WHERE link_id = ?")
        .bind(link_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

fn clip(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_FIELD_LEN).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn setup_with_link(id: &str) -> AccessLedger {
        let pool = db::memory_pool().await.unwrap();
        sqlx::query(
            "INSERT INTO links (id, owner_id, storage_ref, filename, created_at)
             VALUES (?, 'owner-1', 'file:///tmp/x.pdf', 'x.pdf', 0)",
        )
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();
        AccessLedger::new(pool)
    }

    async fn access_count(ledger: &AccessLedger, id: &str) -> i64 {
        sqlx::query_scalar("SELECT access_count FROM links WHERE id = ?")
            .bind(id)
            .fetch_one(&ledger.db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn append_increments_counter_and_lists_newest_first() {
        let ledger = setup_with_link("link0001").await;
        for at in [1_000, 3_000, 2_000] {
            let details = EventDetails {
                ip: Some(format!("10.0.0.{}", at / 1000)),
                ..Default::default()
            };
            ledger
                .append_at("link0001", AccessKind::Delivery, details, at)
                .await
                .unwrap();
        }

        let events = ledger.list_recent("link0001", 10).await.unwrap();
        let times: Vec<i64> = events.iter().map(|e| e.at).collect();
        assert_eq!(times, vec![3_000, 2_000, 1_000]);
        assert_eq!(access_count(&ledger, "link0001").await, 3);

        let limited = ledger.list_recent("link0001", 2).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].at, 3_000);
    }

    #[tokio::test]
    async fn duplicate_events_are_kept() {
        let ledger = setup_with_link("link0002").await;
        let details = EventDetails {
            ip: Some("10.0.0.1".into()),
            ..Default::default()
        };
        for _ in 0..2 {
            ledger
                .append_at("link0002", AccessKind::Gate, details.clone(), 5)
                .await
                .unwrap();
        }
        assert_eq!(ledger.list_recent("link0002", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_link_is_rejected_without_side_effects() {
        let ledger = setup_with_link("link0003").await;
        let err = ledger
            .append("missing1", AccessKind::Delivery, EventDetails::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::LinkNotFound(_)));
        assert!(ledger.list_recent("missing1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_fields_are_dropped_and_long_ones_clipped() {
        let ledger = setup_with_link("link0004").await;
        let details = EventDetails {
            ip: Some("   ".into()),
            user_agent: Some("x".repeat(2 * MAX_FIELD_LEN)),
            ..Default::default()
        };
        let event = ledger
            .append("link0004", AccessKind::Delivery, details)
            .await
            .unwrap();
        assert_eq!(event.ip, None);
        assert_eq!(event.user_agent.unwrap().len(), MAX_FIELD_LEN);
    }
}
