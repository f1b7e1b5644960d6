//! Defines the HTTP surface of the document gate.
//!
//! ## Structure
//! - **Viewer endpoints**
//!   - `POST /token`: mint a capability token after the identity gate
//!   - `POST /log-access`: record a gate pass
//!   - `GET|HEAD /stream/{link_id}?token=`: gated byte delivery with ranges
//!   - `GET  /stream/meta?id=`: delivery diagnostics, no bytes
//!
//! - **Owner endpoints** (caller identified by `x-owner-id`)
//!   - `POST   /upload`: multipart upload, returns the viewer URL
//!   - `GET    /links`: links with live risk scores
//!   - `GET    /links/{id}`, `DELETE /links/{id}`
//!
//! - **Ingestion**: `POST /batch` with a bearer API key
//!
//! `/stream/meta` is a static segment and always wins over `/stream/{link_id}`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        ingest_handlers::{log_access, run_batch, upload_document},
        link_handlers::{delete_link, get_link, list_links},
        stream_handlers::{document_meta, get_document, head_document},
        token_handlers::mint_token,
    },
    services::ingest_service::MAX_DOCUMENT_BYTES,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Multipart framing on top of the document itself.
const UPLOAD_OVERHEAD: usize = 64 * 1024;

/// Build the router. State is attached by the caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // viewer
        .route("/token", post(mint_token))
        .route("/log-access", post(log_access))
        .route("/stream/meta", get(document_meta))
        .route("/stream/{link_id}", get(get_document).head(head_document))
        // owner
        .route(
            "/upload",
            post(upload_document).layer(DefaultBodyLimit::max(MAX_DOCUMENT_BYTES + UPLOAD_OVERHEAD)),
        )
        .route("/links", get(list_links))
        .route("/links/{id}", get(get_link).delete(delete_link))
        // ingestion
        .route("/batch", post(run_batch))
        .layer(TraceLayer::new_for_http())
}
