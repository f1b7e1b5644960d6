//! Gated document delivery: `GET|HEAD /stream/{link_id}` and the diagnostics
//! probe `GET /stream/meta`.
//!
//! The access event is written before any byte leaves, so an aborted stream
//! never needs compensation in the ledger.

use crate::{
    errors::AppError,
    handlers::extractors::RequestHints,
    services::delivery::{DeliveryPlan, Diagnostics},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, header},
    response::Response,
};
use futures::TryStreamExt;
use serde::Deserialize;
use tracing::error;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MetaQuery {
    pub id: Option<String>,
}

/// `GET /stream/{link_id}?token=...`
///
/// Streams the whole document (`200`) or the single requested byte window
/// (`206`). Unusable ranges fall back to the full body.
pub async fn get_document(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
    Query(q): Query<StreamQuery>,
    hints: RequestHints,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let doc = state
        .delivery
        .resolve(&link_id, q.token.as_deref())
        .await?;

    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let plan = DeliveryPlan::for_request(range_header, doc.size);

    state.delivery.record(&doc, hints.into_details()).await;

    let stream = state.delivery.open(&doc, &plan).await?;
    let stream = stream.inspect_err(move |err| {
        error!(link_id = %link_id, error = %err, "document stream failed mid-transfer");
    });

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = plan.status;
    let resp_headers = response.headers_mut();
    *resp_headers = doc.headers.clone();
    resp_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(plan.content_length));
    if let Some(range) = plan.range {
        if let Ok(value) = HeaderValue::from_str(&range.content_range(doc.size)) {
            resp_headers.insert(header::CONTENT_RANGE, value);
        }
    }

    Ok(response)
}

/// `HEAD /stream/{link_id}?token=...`: GET headers with the full length and
/// no body. Still counts as an access.
pub async fn head_document(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
    Query(q): Query<StreamQuery>,
    hints: RequestHints,
) -> Result<Response, AppError> {
    let doc = state
        .delivery
        .resolve(&link_id, q.token.as_deref())
        .await?;

    state.delivery.record(&doc, hints.into_details()).await;

    let mut response = Response::new(Body::empty());
    let resp_headers = response.headers_mut();
    *resp_headers = doc.headers.clone();
    resp_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(doc.size));

    Ok(response)
}

/// `GET /stream/meta?id=...`: always `200`; `ok: false` reports a logical
/// failure.
pub async fn document_meta(
    State(state): State<AppState>,
    Query(q): Query<MetaQuery>,
) -> Json<Diagnostics> {
    Json(state.delivery.diagnose(q.id.as_deref()).await)
}
