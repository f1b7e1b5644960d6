//! Owner-facing link endpoints: dashboard listing with risk, lookup, delete.

use crate::{
    errors::AppError,
    handlers::extractors::OwnerId,
    models::link::Link,
    services::{
        link_registry::MAX_LIST_LIMIT,
        risk::{self, RiskFlag},
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Events fed to the scorer per link.
const RISK_HISTORY: i64 = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListLinksQuery {
    pub owner_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct LinkWithRisk {
    #[serde(flatten)]
    pub link: Link,
    pub risk: u8,
    pub flags: Vec<RiskFlag>,
}

#[derive(Debug, Serialize)]
pub struct ListLinksResp {
    pub links: Vec<LinkWithRisk>,
}

/// `GET /links?ownerId=...`: the caller's links, newest first, each with a
/// live risk score over its recent history.
pub async fn list_links(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Query(q): Query<ListLinksQuery>,
) -> Result<Json<ListLinksResp>, AppError> {
    if q.owner_id.as_deref().is_some_and(|requested| requested != owner_id) {
        return Err(AppError::new(
            axum::http::StatusCode::FORBIDDEN,
            "links of another owner are not visible",
        ));
    }

    let links = state
        .registry
        .list_by_owner(&owner_id, q.limit.unwrap_or(MAX_LIST_LIMIT))
        .await?;

    let mut out = Vec::with_capacity(links.len());
    for link in links {
        let events = state.ledger.list_recent(&link.id, RISK_HISTORY).await?;
        let assessment = risk::score(&events);
        out.push(LinkWithRisk {
            link,
            risk: assessment.score,
            flags: assessment.reasons.into_iter().collect(),
        });
    }

    Ok(Json(ListLinksResp { links: out }))
}

/// `GET /links/{id}`: only the owner sees a link; anyone else gets `404`.
pub async fn get_link(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<String>,
) -> Result<Json<Link>, AppError> {
    let link = state.registry.get(&id).await?;
    if link.owner_id != owner_id {
        return Err(AppError::not_found("not found"));
    }
    Ok(Json(link))
}

/// `DELETE /links/{id}`: removes the link, its events and its payload.
pub async fn delete_link(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let link = state.registry.get(&id).await?;
    if link.owner_id != owner_id {
        return Err(AppError::not_found("not found"));
    }
    state.registry.delete(&id).await?;
    Ok(Json(json!({ "ok": true, "id": id })))
}
