//! Represents a shareable, view-only document link.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One shareable, watermark-stamped document.
///
/// A link points at immutable bytes in the blob store. Apart from creation and
/// deletion, the only mutation it ever sees is `access_count`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    /// Short opaque identifier used in viewer and stream URLs.
    pub id: String,

    /// Account that uploaded the document.
    pub owner_id: String,

    /// Backend-specific locator (`file://...` or `s3://bucket/key`).
    pub storage_ref: String,

    /// Display name as uploaded. Sanitized before it reaches a header.
    pub filename: String,

    /// Creation time, epoch milliseconds.
    pub created_at: i64,

    /// Optional hard expiry, epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    /// Free-text tag for filtering on the dashboard.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lender: Option<String>,

    /// Number of ledger entries written for this link.
    pub access_count: i64,
}

impl Link {
    /// Whether the hard expiry (if any) has passed at `now_ms`.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now_ms)
    }
}

/// Fields supplied by the caller when registering a link.
#[derive(Debug, Clone)]
pub struct NewLink {
    pub id: String,
    pub owner_id: String,
    pub storage_ref: String,
    pub filename: String,
    pub expires_at: Option<i64>,
    pub lender: Option<String>,
}
