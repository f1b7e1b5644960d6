//! Access Token Service: mints and verifies single-link capability tokens.
//!
//! Token lifecycle is `Minted -> Valid (now < expires_at) -> Expired`. Expiry
//! is checked lazily on every read; expired rows are purged opportunistically
//! when new tokens are minted. Verification fails closed and never tells the
//! caller why.

use crate::{
    models::access_token::{AccessToken, NetworkHint},
    services::{
        link_registry::{LinkRegistry, RegistryError},
        now_millis,
    },
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sqlx::SqlitePool;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Consumer email providers rejected by the identity gate.
pub const FREE_EMAIL_DOMAINS: [&str; 11] = [
    "gmail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "aol.com",
    "icloud.com",
    "proton.me",
    "protonmail.com",
    "pm.me",
    "zoho.com",
    "gmx.com",
];

/// Random bytes per token.
const TOKEN_BYTES: usize = 16;
/// Length of the base64url (unpadded) encoding of `TOKEN_BYTES`.
const TOKEN_LEN: usize = 22;

const TOKEN_COLUMNS: &str = "token, link_id, identity, ip, user_agent, timezone, screen, \
                             fingerprint, lender, issued_at, expires_at, consumed";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("identity `{0}` is not an accepted business email address")]
    Unauthorized(String),
    #[error("link `{0}` not found")]
    LinkNotFound(String),
    #[error("invalid or expired token")]
    Invalid,
    #[error(transparent)]
    Registry(RegistryError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl From<RegistryError> for TokenError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => TokenError::LinkNotFound(id),
            other => TokenError::Registry(other),
        }
    }
}

pub type TokenResult<T> = Result<T, TokenError>;

#[derive(Debug, Clone, Copy)]
pub struct TokenPolicy {
    /// Lifetime of a freshly minted token.
    pub ttl: Duration,
    /// When set, the first successful verification consumes the token.
    pub single_use: bool,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            single_use: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TokenService {
    db: SqlitePool,
    registry: LinkRegistry,
    policy: TokenPolicy,
}

impl TokenService {
    pub fn new(db: SqlitePool, registry: LinkRegistry, policy: TokenPolicy) -> Self {
        Self {
            db,
            registry,
            policy,
        }
    }

    pub async fn mint(
        &self,
        link_id: &str,
        identity: &str,
        hint: NetworkHint,
        lender: Option<String>,
    ) -> TokenResult<AccessToken> {
        self.mint_at(link_id, identity, hint, lender, now_millis())
            .await
    }

    /// Gate the identity, check the link, then persist a fresh random token
    /// valid for the configured TTL from `now_ms`.
    pub async fn mint_at(
        &self,
        link_id: &str,
        identity: &str,
        hint: NetworkHint,
        lender: Option<String>,
        now_ms: i64,
    ) -> TokenResult<AccessToken> {
        let identity = check_business_identity(identity)?;
        let link = self.registry.get_active(link_id).await?;

        let purged = sqlx::query("DELETE FROM access_tokens WHERE expires_at <= ?")
            .bind(now_ms)
            .execute(&self.db)
            .await?
            .rows_affected();
        if purged > 0 {
            debug!(purged, "purged expired access tokens");
        }

        let token = AccessToken {
            token: generate_token(),
            link_id: link.id,
            identity,
            hint,
            lender,
            issued_at: now_ms,
            expires_at: now_ms + self.policy.ttl.as_millis() as i64,
            consumed: false,
        };

        sqlx::query(&format!(
            "INSERT INTO access_tokens ({TOKEN_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)"
        ))
        .bind(&token.token)
        .bind(&token.link_id)
        .bind(&token.identity)
        .bind(&token.hint.ip)
        .bind(&token.hint.user_agent)
        .bind(&token.hint.timezone)
        .bind(&token.hint.screen)
        .bind(&token.hint.fingerprint)
        .bind(&token.lender)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .execute(&self.db)
        .await?;

        info!(
            link_id = %token.link_id,
            token = %redact(&token.token),
            expires_at = token.expires_at,
            "access token minted"
        );
        Ok(token)
    }

    pub async fn verify(&self, token: &str, link_id: &str) -> TokenResult<AccessToken> {
        self.verify_at(token, link_id, now_millis()).await
    }

    /// Succeeds only for a known, unexpired token minted for `link_id`.
    /// Every failure collapses into [`TokenError::Invalid`].
    pub async fn verify_at(
        &self,
        token: &str,
        link_id: &str,
        now_ms: i64,
    ) -> TokenResult<AccessToken> {
        if !is_well_formed(token) {
            debug!("rejecting malformed token");
            return Err(TokenError::Invalid);
        }

        let record = sqlx::query_as::<_, AccessToken>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM access_tokens WHERE token = ?"
        ))
        .bind(token)
        .fetch_optional(&self.db)
        .await?;

        let Some(record) = record else {
            debug!(token = %redact(token), "rejecting unknown token");
            return Err(TokenError::Invalid);
        };
        if record.link_id != link_id {
            debug!(token = %redact(token), link_id = %link_id, "rejecting token for another link");
            return Err(TokenError::Invalid);
        }
        if !record.is_live_at(now_ms) {
            debug!(token = %redact(token), "rejecting expired token");
            return Err(TokenError::Invalid);
        }

        if self.policy.single_use {
            let claimed =
                sqlx::query("UPDATE access_tokens SET consumed = 1 WHERE token = ? AND consumed = 0")
                    .bind(token)
                    .execute(&self.db)
                    .await?
                    .rows_affected();
            if claimed == 0 {
                debug!(token = %redact(token), "rejecting consumed token");
                return Err(TokenError::Invalid);
            }
            return Ok(AccessToken {
                consumed: true,
                ..record
            });
        }

        Ok(record)
    }
}

/// Normalize `identity` and reject free/consumer email domains.
///
/// The domain is the substring after the last `@`, compared
/// case-insensitively against [`FREE_EMAIL_DOMAINS`].
pub fn check_business_identity(identity: &str) -> TokenResult<String> {
    let normalized = identity.trim().to_ascii_lowercase();
    let Some((local, domain)) = normalized.rsplit_once('@') else {
        return Err(TokenError::Unauthorized(identity.to_string()));
    };
    if local.is_empty()
        || domain.is_empty()
        || !domain.contains('.')
        || FREE_EMAIL_DOMAINS.contains(&domain)
    {
        return Err(TokenError::Unauthorized(identity.to_string()));
    }
    Ok(normalized)
}

fn generate_token() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// First few characters only, for logs.
pub(crate) fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{prefix}…")
}
