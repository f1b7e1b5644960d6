//! Domain services. Handlers stay thin and delegate here.

pub mod access_ledger;
pub mod api_keys;
pub mod blob_store;
pub mod delivery;
pub mod ingest_service;
pub mod link_registry;
pub mod local_blob_store;
pub mod rate_limiter;
pub mod risk;
pub mod s3_blob_store;
pub mod token_service;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
