//! `POST /token`: the identity gate in front of every delivery.

use crate::{
    errors::AppError, handlers::extractors::RequestHints, models::access_token::NetworkHint,
    state::AppState,
};
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintTokenReq {
    pub link_id: String,
    pub identity: String,
    #[serde(default)]
    pub lender: Option<String>,
    /// Client-declared hints. `ip` and `userAgent` are taken from the request
    /// when the client leaves them out.
    #[serde(flatten)]
    pub hint: NetworkHint,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MintTokenResp {
    pub token: String,
    pub expires_at: i64,
}

pub async fn mint_token(
    State(state): State<AppState>,
    hints: RequestHints,
    Json(req): Json<MintTokenReq>,
) -> Result<Json<MintTokenResp>, AppError> {
    let mut hint = req.hint;
    if hint.ip.is_none() {
        hint.ip = hints.ip;
    }
    if hint.user_agent.is_none() {
        hint.user_agent = hints.user_agent;
    }

    let token = state
        .tokens
        .mint(&req.link_id, &req.identity, hint, req.lender)
        .await?;

    Ok(Json(MintTokenResp {
        token: token.token,
        expires_at: token.expires_at,
    }))
}
