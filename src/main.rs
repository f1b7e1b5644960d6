use anyhow::{Context, Result};
use docgate::{
    config::{AppConfig, Command},
    db,
    services::{
        api_keys::ApiKeyStore, blob_store::BlobStore, local_blob_store::LocalBlobStore,
        s3_blob_store::S3BlobStore,
    },
    state::AppState,
};
use std::{io::ErrorKind, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting docgate with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db = db::connect(&cfg.database_url).await?;
    db::run_migrations(&db).await?;

    match command {
        Command::Migrate => {
            tracing::info!("Database migration complete.");
            return Ok(());
        }
        Command::IssueApiKey { owner_id } => {
            let key = ApiKeyStore::new(db.clone())
                .issue(&owner_id)
                .await
                .context("issuing API key")?;
            tracing::info!(owner_id = %owner_id, "API key issued");
            println!("{}", key);
            return Ok(());
        }
        Command::Serve => {}
    }

    // --- Select blob backend ---
    let blobs: Arc<dyn BlobStore> = match cfg.s3_bucket.as_deref() {
        Some(bucket) => {
            tracing::info!(bucket, "Using S3 blob store");
            Arc::new(S3BlobStore::from_env(bucket).await)
        }
        None => {
            let store = LocalBlobStore::new(&cfg.storage_dir)
                .await
                .with_context(|| format!("opening storage directory {}", cfg.storage_dir))?;
            tracing::info!(root = %store.root().display(), "Using local blob store");
            Arc::new(store)
        }
    };

    // --- Build router ---
    let addr = cfg.addr();
    let host = cfg.host.clone();
    let port = cfg.port;
    let app = docgate::app(AppState::new(db, blobs, cfg));

    // --- Start server ---
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
