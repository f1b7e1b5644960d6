//! Request extractors: caller identity headers and observed network hints.

use crate::{errors::AppError, models::access_event::EventDetails};
use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use std::{convert::Infallible, net::SocketAddr};

/// Header carrying the owner id resolved by the upstream session layer.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Edge-provided country headers, most specific first.
const COUNTRY_HEADERS: [&str; 2] = ["x-vercel-ip-country", "cf-ipcountry"];

/// Network attributes observed on the request itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHints {
    pub ip: Option<String>,
    pub country: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestHints {
    pub fn from_headers(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        // First hop of x-forwarded-for, else the socket peer.
        let ip = header_str(headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
            .or_else(|| peer.map(|addr| addr.ip().to_string()));

        let country = COUNTRY_HEADERS
            .iter()
            .find_map(|name| header_str(headers, name))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_uppercase);

        let user_agent = header_str(headers, header::USER_AGENT.as_str()).map(String::from);

        Self {
            ip,
            country,
            user_agent,
        }
    }

    /// Seed ledger details with what the request exposes.
    pub fn into_details(self) -> EventDetails {
        EventDetails {
            ip: self.ip,
            country: self.country,
            user_agent: self.user_agent,
            ..EventDetails::default()
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestHints {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        Ok(Self::from_headers(&parts.headers, peer))
    }
}

/// Authenticated document owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for OwnerId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_str(&parts.headers, OWNER_HEADER)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| OwnerId(v.to_string()))
            .ok_or_else(|| AppError::unauthorized("missing caller identity"))
    }
}

/// Bearer API key for batch ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ApiKey {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = header_str(&parts.headers, header::AUTHORIZATION.as_str())
            .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;

        let key = auth_header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::unauthorized("Invalid Authorization header format"))?;

        Ok(ApiKey(key.to_string()))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
