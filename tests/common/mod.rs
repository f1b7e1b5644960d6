#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, header::CONTENT_TYPE},
};
use bytes::Bytes;
use docgate::{
    config::AppConfig,
    db,
    models::link::{Link, NewLink},
    services::{blob_store::BlobStore, local_blob_store::LocalBlobStore},
    state::AppState,
};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const OWNER: &str = "owner-1";
pub const VIEWER: &str = "reviewer@acme-lending.com";

/// Router plus direct access to its services, backed by an in-memory database
/// and a temporary blob directory.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    _dir: TempDir,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(AppConfig::default()).await
}

pub async fn spawn_app_with(config: AppConfig) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(dir.path()).await.unwrap());
    spawn_app_on(config, blobs, dir).await
}

/// App over an arbitrary blob backend.
pub async fn spawn_app_with_blobs(blobs: Arc<dyn BlobStore>) -> TestApp {
    spawn_app_on(AppConfig::default(), blobs, tempfile::tempdir().unwrap()).await
}

async fn spawn_app_on(config: AppConfig, blobs: Arc<dyn BlobStore>, dir: TempDir) -> TestApp {
    let pool = db::memory_pool().await.unwrap();
    let state = AppState::new(pool, blobs, config);
    TestApp {
        router: docgate::app(state.clone()),
        state,
        _dir: dir,
    }
}

/// 100 distinct bytes, so any window is recognisable.
pub fn payload() -> Vec<u8> {
    (0u8..100).collect()
}

impl TestApp {
    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response<Body> {
        self.send(
            Request::post(uri)
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Store `bytes` and register a link for them, bypassing HTTP.
    pub async fn seed_link(&self, id: &str, bytes: &[u8]) -> Link {
        let storage_ref = self
            .state
            .blobs
            .put(OWNER, "Loan Agreement.pdf", Bytes::copy_from_slice(bytes))
            .await
            .unwrap();
        self.state
            .registry
            .create(NewLink {
                id: id.to_string(),
                owner_id: OWNER.to_string(),
                storage_ref,
                filename: "Loan Agreement.pdf".to_string(),
                expires_at: None,
                lender: None,
            })
            .await
            .unwrap()
    }

    /// Mint a token through the public endpoint.
    pub async fn mint(&self, link_id: &str) -> String {
        let resp = self
            .post_json(
                "/token",
                serde_json::json!({ "linkId": link_id, "identity": VIEWER }),
            )
            .await;
        assert_eq!(resp.status(), 200);
        body_json(resp).await["token"].as_str().unwrap().to_string()
    }

    pub async fn access_count(&self, link_id: &str) -> i64 {
        self.state.registry.get(link_id).await.unwrap().access_count
    }
}

pub async fn body_bytes(resp: Response<Body>) -> Bytes {
    to_bytes(resp.into_body(), usize::MAX).await.unwrap()
}

pub async fn body_json(resp: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}
