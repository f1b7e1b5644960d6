//! Core data models for the gated document delivery service.
//!
//! These entities map cleanly to SQLite tables via `sqlx::FromRow` and
//! serialize as camelCase JSON via `serde`. Timestamps are epoch milliseconds.

pub mod access_event;
pub mod access_token;
pub mod link;
