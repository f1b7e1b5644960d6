//! Document intake (`/upload`, `/batch`) and the gate-pass event
//! (`/log-access`).

use crate::{
    errors::AppError,
    handlers::extractors::{ApiKey, OwnerId, RequestHints},
    models::access_event::AccessKind,
    services::ingest_service::{BatchJob, BatchOutcome},
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResp {
    pub ok: bool,
    pub link_id: String,
    pub viewer_url: String,
}

/// `POST /upload` (multipart): `file`, optional `lender` (alias `qr`) and
/// `expiresAt` in epoch milliseconds.
pub async fn upload_document(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResp>), AppError> {
    let mut file: Option<(String, Bytes)> = None;
    let mut lender = None;
    let mut expires_at = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("document.pdf").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::bad_request(e.to_string()))?;
                file = Some((filename, data));
            }
            "lender" | "qr" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::bad_request(e.to_string()))?;
                if lender.is_none() && !text.trim().is_empty() {
                    lender = Some(text);
                }
            }
            "expiresAt" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::bad_request(e.to_string()))?;
                let text = text.trim();
                if !text.is_empty() {
                    let value = text
                        .parse::<i64>()
                        .map_err(|_| AppError::bad_request("expiresAt must be epoch milliseconds"))?;
                    expires_at = Some(value);
                }
            }
            _ => {}
        }
    }

    let (filename, data) = file.ok_or_else(|| AppError::bad_request("missing file"))?;
    let link = state
        .ingest
        .upload(&owner_id, &filename, data, lender, expires_at)
        .await?;

    info!(link_id = %link.id, owner_id = %owner_id, "document uploaded");
    Ok((
        StatusCode::CREATED,
        Json(UploadResp {
            ok: true,
            viewer_url: state.ingest.viewer_url(&link.id),
            link_id: link.id,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct BatchResp {
    pub ok: bool,
    pub results: Vec<BatchOutcome>,
}

/// `POST /batch`: JSON array of remote documents, bearer API key.
pub async fn run_batch(
    State(state): State<AppState>,
    ApiKey(api_key): ApiKey,
    Json(jobs): Json<Vec<BatchJob>>,
) -> Result<Json<BatchResp>, AppError> {
    let results = state.ingest.run_batch(&api_key, jobs).await?;
    Ok(Json(BatchResp { ok: true, results }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogAccessReq {
    pub link_id: String,
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// `POST /log-access`: records that a viewer passed the identity gate.
pub async fn log_access(
    State(state): State<AppState>,
    hints: RequestHints,
    Json(req): Json<LogAccessReq>,
) -> Result<Json<Value>, AppError> {
    let link = state.registry.get_active(&req.link_id).await?;

    let mut details = hints.into_details();
    details.identity = req.identity;
    details.fingerprint = req.fingerprint;

    state
        .ledger
        .append(&link.id, AccessKind::Gate, details)
        .await?;
    Ok(Json(json!({ "ok": true })))
}
