use crate::services::{
    access_ledger::LedgerError,
    blob_store::BlobError,
    delivery::DeliveryError,
    ingest_service::IngestError,
    link_registry::RegistryError,
    rate_limiter::RateLimitError,
    token_service::TokenError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// HTTP-facing error: a status plus a message rendered as a JSON body.
///
/// Every service error converts into this at the handler boundary. Server-side
/// failures are logged with detail and reported to the caller generically.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error. The detail is logged only.
    pub fn internal(detail: impl fmt::Display) -> Self {
        tracing::error!(error = %detail, "internal error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    /// 502 for a storage backend that failed before any byte was sent.
    pub fn upstream(detail: impl fmt::Display) -> Self {
        tracing::error!(error = %detail, "storage backend failure");
        Self::new(StatusCode::BAD_GATEWAY, "failed to fetch document")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::internal(err)
    }
}

impl From<BlobError> for AppError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound(_) => AppError::not_found("document not found"),
            BlobError::InvalidRef(_) | BlobError::InvalidName(_) => {
                AppError::bad_request(err.to_string())
            }
            BlobError::Upstream(_) => AppError::upstream(err),
            BlobError::Io(_) => AppError::internal(err),
        }
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => AppError::not_found("not found"),
            RegistryError::DuplicateId(_) => AppError::new(StatusCode::CONFLICT, err.to_string()),
            RegistryError::MissingBlob(_) | RegistryError::InvalidLink(_) => {
                AppError::bad_request(err.to_string())
            }
            RegistryError::Blob(err) => err.into(),
            RegistryError::Sqlx(err) => err.into(),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            // The identity gate is reported as a bad request on the mint endpoint.
            TokenError::Unauthorized(_) => {
                AppError::bad_request("personal email domains are not allowed")
            }
            TokenError::LinkNotFound(_) => AppError::not_found("not found"),
            TokenError::Invalid => AppError::unauthorized("invalid or expired token"),
            TokenError::Registry(err) => err.into(),
            TokenError::Sqlx(err) => err.into(),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::LinkNotFound(_) => AppError::not_found("not found"),
            LedgerError::Sqlx(err) => err.into(),
        }
    }
}

impl From<RateLimitError> for AppError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Exceeded { .. } => {
                AppError::new(StatusCode::TOO_MANY_REQUESTS, err.to_string())
            }
            RateLimitError::Sqlx(err) => err.into(),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::InvalidUpload(_) => AppError::bad_request(err.to_string()),
            IngestError::UnknownApiKey => AppError::unauthorized("invalid API key"),
            IngestError::RateLimited(err) => err.into(),
            IngestError::Blob(err) => err.into(),
            IngestError::Registry(err) => err.into(),
            IngestError::Sqlx(err) => err.into(),
        }
    }
}

impl From<DeliveryError> for AppError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::InvalidToken => AppError::unauthorized("invalid or expired token"),
            DeliveryError::LinkNotFound(_) => AppError::not_found("not found"),
            DeliveryError::BlobNotFound(_) => AppError::not_found("document not found"),
            DeliveryError::Upstream(_) => AppError::upstream(err),
            DeliveryError::Internal(_) => AppError::internal(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_distinct_statuses() {
        let cases: Vec<(AppError, StatusCode)> = vec![
            (DeliveryError::InvalidToken.into(), StatusCode::UNAUTHORIZED),
            (DeliveryError::LinkNotFound("x".into()).into(), StatusCode::NOT_FOUND),
            (DeliveryError::Upstream("boom".into()).into(), StatusCode::BAD_GATEWAY),
            (TokenError::Unauthorized("a@gmail.com".into()).into(), StatusCode::BAD_REQUEST),
            (
                RateLimitError::Exceeded { quota: 60, window_secs: 60 }.into(),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (RegistryError::DuplicateId("x".into()).into(), StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(err.status, status, "{}", err.message);
        }
    }

    #[test]
    fn not_found_and_failed_to_load_stay_distinguishable() {
        let missing: AppError = DeliveryError::BlobNotFound("x".into()).into();
        let failed: AppError = DeliveryError::Upstream("reset".into()).into();
        assert_ne!(missing.status, failed.status);
        assert_ne!(missing.message, failed.message);
    }
}
