//! Shared application state handed to every handler.

use crate::{
    config::AppConfig,
    services::{
        access_ledger::AccessLedger,
        api_keys::ApiKeyStore,
        blob_store::BlobStore,
        delivery::DeliveryService,
        ingest_service::IngestService,
        link_registry::LinkRegistry,
        rate_limiter::SlidingWindowLimiter,
        token_service::{TokenPolicy, TokenService},
    },
};
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};

/// Rolling window for the batch ingestion quota.
const BATCH_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct AppState {
    pub db: SqlitePool,
    pub blobs: Arc<dyn BlobStore>,
    pub registry: LinkRegistry,
    pub tokens: TokenService,
    pub ledger: AccessLedger,
    pub delivery: DeliveryService,
    pub ingest: IngestService,
    pub api_keys: ApiKeyStore,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wire every service over one pool and one blob backend.
    pub fn new(db: SqlitePool, blobs: Arc<dyn BlobStore>, config: AppConfig) -> Self {
        let registry = LinkRegistry::new(db.clone(), blobs.clone());
        let tokens = TokenService::new(
            db.clone(),
            registry.clone(),
            TokenPolicy {
                ttl: config.token_ttl,
                single_use: config.single_use_tokens,
            },
        );
        let ledger = AccessLedger::new(db.clone());
        let api_keys = ApiKeyStore::new(db.clone());
        let delivery = DeliveryService::new(
            registry.clone(),
            tokens.clone(),
            ledger.clone(),
            blobs.clone(),
            config.frame_ancestors.clone(),
        );
        let limiter = SlidingWindowLimiter::new(db.clone(), config.batch_quota, BATCH_WINDOW);
        let ingest = IngestService::new(
            registry.clone(),
            blobs.clone(),
            api_keys.clone(),
            limiter,
            config.public_url.clone(),
        );

        Self {
            db,
            blobs,
            registry,
            tokens,
            ledger,
            delivery,
            ingest,
            api_keys,
            config: Arc::new(config),
        }
    }
}
