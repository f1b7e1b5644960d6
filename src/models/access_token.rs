//! Represents a short-lived capability token for a single link.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Advisory attributes observed or declared when the token was minted.
///
/// None of these are an access-control boundary. They only enrich the ledger
/// for later human review.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkHint {
    /// Requester IP at mint time.
    #[serde(default)]
    pub ip: Option<String>,

    /// Browser user-agent string.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// IANA timezone reported by the client.
    #[serde(default)]
    pub timezone: Option<String>,

    /// Screen descriptor reported by the client (e.g. `1920x1080x24`).
    #[serde(default)]
    pub screen: Option<String>,

    /// Client-computed device fingerprint hash.
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// A minted capability token.
///
/// Authorizes streaming exactly one `link_id` until `expires_at`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    /// Random external handle (base64url, 16 bytes of entropy).
    pub token: String,

    /// The one document this token may stream.
    pub link_id: String,

    /// Viewer-declared email that passed the business-domain gate.
    pub identity: String,

    /// Advisory client attributes.
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub hint: NetworkHint,

    /// Optional lender tag echoed from the viewer gate.
    pub lender: Option<String>,

    /// Mint time, epoch milliseconds.
    pub issued_at: i64,

    /// Expiry, epoch milliseconds. The token is invalid once `now >= expires_at`.
    pub expires_at: i64,

    /// Set when the single-use policy is active and the token has been used.
    pub consumed: bool,
}

impl AccessToken {
    /// Whether the token is still inside its validity window at `now_ms`.
    pub fn is_live_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at
    }
}
