//! Ingestion API keys: opaque bearer credentials mapped to an owner.

use crate::services::now_millis;
use sqlx::SqlitePool;

#[derive(Clone, Debug)]
pub struct ApiKeyStore {
    db: SqlitePool,
}

impl ApiKeyStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create a new random key for `owner_id` and return it.
    pub async fn issue(&self, owner_id: &str) -> sqlx::Result<String> {
        let bytes: [u8; 16] = rand::random();
        let key: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        sqlx::query("INSERT INTO api_keys (key, owner_id, created_at) VALUES (?, ?, ?)")
            .bind(&key)
            .bind(owner_id)
            .bind(now_millis())
            .execute(&self.db)
            .await?;
        Ok(key)
    }

    pub async fn owner_for(&self, key: &str) -> sqlx::Result<Option<String>> {
        sqlx::query_scalar("SELECT owner_id FROM api_keys WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn issued_keys_resolve_to_their_owner() {
        let store = ApiKeyStore::new(db::memory_pool().await.unwrap());
        let key = store.issue("owner-7").await.unwrap();
        assert_eq!(key.len(), 32);
        assert_eq!(store.owner_for(&key).await.unwrap().as_deref(), Some("owner-7"));
        assert_eq!(store.owner_for("nope").await.unwrap(), None);
    }
}
