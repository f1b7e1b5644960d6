//! Represents one observed read attempt against a link.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Which gate produced the event.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AccessKind {
    /// The viewer passed the identity gate page.
    Gate,
    /// Bytes (or headers, for HEAD) were served by the delivery endpoint.
    Delivery,
}

/// Append-only ledger entry.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessEvent {
    pub id: String,
    pub link_id: String,
    pub kind: AccessKind,

    /// Observation time, epoch milliseconds. Events are ordered by this field.
    pub at: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Geo hint from an edge header (ISO country code).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// Observed request attributes that become an event when appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventDetails {
    pub ip: Option<String>,
    pub country: Option<String>,
    pub user_agent: Option<String>,
    pub identity: Option<String>,
    pub fingerprint: Option<String>,
}
