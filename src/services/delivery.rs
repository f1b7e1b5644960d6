//! Delivery Service: token-gated, range-aware document streaming.
//!
//! Resolution order for a request: verify the token, resolve the link, build
//! the fixed security headers, stat the blob, then pick a full or partial
//! plan. The ledger entry is written before any byte is streamed.

use crate::{
    models::{
        access_event::{AccessKind, EventDetails},
        access_token::AccessToken,
        link::Link,
    },
    services::{
        access_ledger::AccessLedger,
        blob_store::{BackendKind, BlobError, BlobStore, ByteStream},
        link_registry::{LinkRegistry, RegistryError},
        token_service::{TokenError, TokenService},
    },
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Missing, malformed, expired or mismatched token. Deliberately opaque.
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("link `{0}` not found")]
    LinkNotFound(String),
    #[error("document for link `{0}` not found")]
    BlobNotFound(String),
    #[error("storage backend failure: {0}")]
    Upstream(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;

impl From<TokenError> for DeliveryError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Invalid => DeliveryError::InvalidToken,
            TokenError::LinkNotFound(id) => DeliveryError::LinkNotFound(id),
            other => DeliveryError::Internal(other.to_string()),
        }
    }
}

impl From<RegistryError> for DeliveryError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => DeliveryError::LinkNotFound(id),
            other => DeliveryError::Internal(other.to_string()),
        }
    }
}

/// Inclusive byte window inside an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// Parse a single `bytes=start-end?` range against an object of `size` bytes.
///
/// Returns `None` for anything unusable (other units, suffix or multi-range
/// forms, `start >= size`, `start > end`); callers then serve the full
/// object. An omitted or oversized `end` is clamped to `size - 1`.
pub fn parse_range(header: &str, size: u64) -> Option<ByteRange> {
    let spec = header.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    if start.is_empty() || !start.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !end.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let start: u64 = start.parse().ok()?;
    if start >= size {
        return None;
    }
    let end = if end.is_empty() {
        size - 1
    } else {
        // All digits, so a parse failure can only be overflow.
        end.parse::<u64>().unwrap_or(u64::MAX)
    };
    if start > end {
        return None;
    }
    Some(ByteRange {
        start,
        end: end.min(size - 1),
    })
}

/// Reduce an uploaded filename to `[A-Za-z0-9._-]` and force a `.pdf` suffix.
pub fn sanitize_pdf_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect();
    let base = if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    };
    if base.ends_with(".pdf") {
        base
    } else {
        format!("{base}.pdf")
    }
}

/// Headers attached to every successful delivery, regardless of method.
pub fn delivery_headers(filename: &str, frame_ancestors: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.insert(
        HeaderName::from_static("x-robots-tag"),
        HeaderValue::from_static("noindex, nofollow"),
    );
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    let disposition = format!("inline; filename=\"{}\"", sanitize_pdf_filename(filename));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("same-origin"),
    );
    headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("identity"));
    if let Some(ancestors) = frame_ancestors {
        if let Ok(value) = HeaderValue::from_str(&format!("frame-ancestors {ancestors};")) {
            headers.insert(header::CONTENT_SECURITY_POLICY, value);
        }
    }
    headers
}

/// What a GET will send: the whole object or one window of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPlan {
    pub status: StatusCode,
    pub range: Option<ByteRange>,
    pub content_length: u64,
}

impl DeliveryPlan {
    pub fn for_request(range_header: Option<&str>, size: u64) -> Self {
        match range_header.and_then(|h| parse_range(h, size)) {
            Some(range) => Self {
                status: StatusCode::PARTIAL_CONTENT,
                range: Some(range),
                content_length: range.len(),
            },
            None => Self {
                status: StatusCode::OK,
                range: None,
                content_length: size,
            },
        }
    }
}

/// A link that passed the gate, with its blob size and response headers.
#[derive(Debug, Clone)]
pub struct ResolvedDocument {
    pub link: Link,
    pub token: AccessToken,
    pub size: u64,
    pub headers: HeaderMap,
}

/// Response of the diagnostics read path.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub ok: bool,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<BackendKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_range: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Locator scheme the bytes come from (`file` or `s3`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Diagnostics {
    fn failure(id: &str, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            id: id.to_string(),
            storage: None,
            filename: None,
            size: None,
            has_range: None,
            headers: None,
            source: None,
            note: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DeliveryService {
    registry: LinkRegistry,
    tokens: TokenService,
    ledger: AccessLedger,
    blobs: Arc<dyn BlobStore>,
    frame_ancestors: Option<String>,
}

impl DeliveryService {
    pub fn new(
        registry: LinkRegistry,
        tokens: TokenService,
        ledger: AccessLedger,
        blobs: Arc<dyn BlobStore>,
        frame_ancestors: Option<String>,
    ) -> Self {
        Self {
            registry,
            tokens,
            ledger,
            blobs,
            frame_ancestors,
        }
    }

    /// Steps 1-4: token, link, headers, blob size.
    pub async fn resolve(&self, link_id: &str, token: Option<&str>) -> DeliveryResult<ResolvedDocument> {
        let token = self
            .tokens
            .verify(token.unwrap_or_default(), link_id)
            .await?;
        let link = self.registry.get_active(link_id).await?;
        let headers = delivery_headers(&link.filename, self.frame_ancestors.as_deref());

        let stat = self.blobs.stat(&link.storage_ref).await.map_err(|err| match err {
            BlobError::NotFound(_) => DeliveryError::BlobNotFound(link.id.clone()),
            other => DeliveryError::Upstream(other.to_string()),
        })?;

        Ok(ResolvedDocument {
            link,
            token,
            size: stat.size,
            headers,
        })
    }

    /// Append the delivery event. A ledger failure is logged, not fatal: the
    /// viewer has already been authorized.
    pub async fn record(&self, doc: &ResolvedDocument, mut details: EventDetails) {
        details.identity = Some(doc.token.identity.clone());
        if details.fingerprint.is_none() {
            details.fingerprint = doc.token.hint.fingerprint.clone();
        }
        if let Err(err) = self
            .ledger
            .append(&doc.link.id, AccessKind::Delivery, details)
            .await
        {
            warn!(link_id = %doc.link.id, error = %err, "failed to record delivery event");
        }
    }

    /// Open the byte stream for `plan`. Failing here means nothing was sent yet.
    pub async fn open(&self, doc: &ResolvedDocument, plan: &DeliveryPlan) -> DeliveryResult<ByteStream> {
        let (start, end) = match plan.range {
            Some(range) => (Some(range.start), Some(range.end)),
            None => (None, None),
        };
        debug!(link_id = %doc.link.id, ?start, ?end, size = doc.size, "opening blob stream");
        self.blobs
            .open_range(&doc.link.storage_ref, start, end)
            .await
            .map_err(|err| match err {
                BlobError::NotFound(_) => DeliveryError::BlobNotFound(doc.link.id.clone()),
                other => DeliveryError::Upstream(other.to_string()),
            })
    }

    /// Same resolution as a delivery, minus the token gate and the bytes.
    /// Logical failures are reported in the body with `ok: false`.
    pub async fn diagnose(&self, id: Option<&str>) -> Diagnostics {
        let Some(id) = id.filter(|id| !id.is_empty()) else {
            return Diagnostics::failure("", "id required");
        };
        let link = match self.registry.get_active(id).await {
            Ok(link) => link,
            Err(RegistryError::NotFound(_)) => return Diagnostics::failure(id, "not found"),
            Err(err) => return Diagnostics::failure(id, err.to_string()),
        };

        let headers = delivery_headers(&link.filename, self.frame_ancestors.as_deref());
        let mut header_map: BTreeMap<String, String> = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let source = link
            .storage_ref
            .split_once("://")
            .map(|(scheme, _)| scheme.to_string());

        let mut diagnostics = Diagnostics {
            ok: true,
            id: id.to_string(),
            storage: Some(self.blobs.kind()),
            filename: Some(link.filename.clone()),
            size: None,
            has_range: None,
            headers: None,
            source,
            note: None,
            error: None,
        };

        match self.blobs.stat(&link.storage_ref).await {
            Ok(stat) => {
                header_map.insert("content-length".into(), stat.size.to_string());
                diagnostics.size = Some(stat.size);
                diagnostics.has_range = Some(true);
            }
            Err(err) => {
                diagnostics.ok = false;
                diagnostics.error = Some(err.to_string());
                diagnostics.note = Some("failed to read source".into());
            }
        }
        diagnostics.headers = Some(header_map);
        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_closed_and_open_ranges() {
        assert_eq!(parse_range("bytes=0-9", 100), Some(ByteRange { start: 0, end: 9 }));
        assert_eq!(parse_range("bytes=50-", 100), Some(ByteRange { start: 50, end: 99 }));
        assert_eq!(parse_range("bytes=99-99", 100), Some(ByteRange { start: 99, end: 99 }));
    }

    #[test]
    fn clamps_end_past_object() {
        let range = parse_range("bytes=90-200", 100).unwrap();
        assert_eq!(range, ByteRange { start: 90, end: 99 });
        assert_eq!(range.len(), 10);
        assert_eq!(range.content_range(100), "bytes 90-99/100");

        assert_eq!(
            parse_range("bytes=90-99999999999999999999999", 100),
            Some(ByteRange { start: 90, end: 99 })
        );
        let plan = DeliveryPlan::for_request(Some("bytes=90-99999999999999999999999"), 100);
        assert_eq!(plan.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(plan.content_length, 10);
    }

    #[test]
    fn rejects_unusable_ranges() {
        for header in [
            "bytes=10-5",
            "bytes=100-",
            "bytes=150-200",
            "bytes=-500",
            "bytes=0-1,5-9",
            "items=0-9",
            "bytes=a-9",
            "bytes=0-9x",
            "bytes=99999999999999999999999-",
        ] {
            assert_eq!(parse_range(header, 100), None, "{header}");
        }
        assert_eq!(parse_range("bytes=0-", 0), None);
    }

    #[test]
    fn plan_falls_back_to_full_body() {
        let plan = DeliveryPlan::for_request(Some("bytes=10-5"), 100);
        assert_eq!(plan.status, StatusCode::OK);
        assert_eq!(plan.range, None);
        assert_eq!(plan.content_length, 100);

        let plan = DeliveryPlan::for_request(Some("bytes=10-19"), 100);
        assert_eq!(plan.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(plan.content_length, 10);

        assert_eq!(DeliveryPlan::for_request(None, 0).content_length, 0);
    }

    #[test]
    fn filenames_are_sanitized_with_pdf_suffix() {
        assert_eq!(sanitize_pdf_filename("Term Sheet v2.pdf"), "Term_Sheet_v2.pdf");
        assert_eq!(sanitize_pdf_filename("report"), "report.pdf");
        assert_eq!(sanitize_pdf_filename("REPORT.PDF"), "REPORT.PDF.pdf");
        assert_eq!(sanitize_pdf_filename("a\"b;c.pdf"), "a_b_c.pdf");
        assert_eq!(sanitize_pdf_filename(""), "document.pdf");
    }

    #[test]
    fn headers_block_framing_indexing_and_caching() {
        let headers = delivery_headers("deck", None);
        let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        assert_eq!(get("cache-control"), Some("no-store"));
        assert_eq!(get("x-frame-options"), Some("SAMEORIGIN"));
        assert_eq!(get("referrer-policy"), Some("no-referrer"));
        assert_eq!(get("x-robots-tag"), Some("noindex, nofollow"));
        assert_eq!(get("content-type"), Some("application/pdf"));
        assert_eq!(get("content-disposition"), Some("inline; filename=\"deck.pdf\""));
        assert_eq!(get("accept-ranges"), Some("bytes"));
        assert_eq!(get("cross-origin-resource-policy"), Some("same-origin"));
        assert_eq!(get("content-encoding"), Some("identity"));
        assert_eq!(get("content-security-policy"), None);

        let framed = delivery_headers("deck", Some("https://app.example.com"));
        assert_eq!(
            framed.get("content-security-policy").unwrap(),
            "frame-ancestors https://app.example.com;"
        );
    }
}
