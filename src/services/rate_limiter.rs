//! Sliding-window rate limiter keyed by caller credential.
//!
//! Each admitted unit of work is recorded as a timestamp under its key.
//! Timestamps older than the window are trimmed before every check, so the
//! quota applies to any rolling window rather than fixed buckets.

use crate::services::now_millis;
use sqlx::SqlitePool;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded ({quota} per {window_secs}s)")]
    Exceeded { quota: u32, window_secs: u64 },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Clone, Debug)]
pub struct SlidingWindowLimiter {
    db: SqlitePool,
    quota: u32,
    window: Duration,
}

impl SlidingWindowLimiter {
    pub fn new(db: SqlitePool, quota: u32, window: Duration) -> Self {
        Self { db, quota, window }
    }

    pub async fn acquire(&self, key: &str, units: u32) -> Result<(), RateLimitError> {
        self.acquire_at(key, units, now_millis()).await
    }

    /// Admit `units` for `key` if the rolling window has room for all of
    /// them; otherwise admit nothing.
    pub async fn acquire_at(&self, key: &str, units: u32, now_ms: i64) -> Result<(), RateLimitError> {
        let window_ms = self.window.as_millis() as i64;
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM rate_limit_hits WHERE key = ? AND at <= ?")
            .bind(key)
            .bind(now_ms - window_ms)
            .execute(&mut *tx)
            .await?;

        let used: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rate_limit_hits WHERE key = ?")
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;

        if used + i64::from(units) > i64::from(self.quota) {
            debug!(used, units, quota = self.quota, "rate limit exceeded");
            return Err(RateLimitError::Exceeded {
                quota: self.quota,
                window_secs: self.window.as_secs(),
            });
        }

        for _ in 0..units {
            sqlx::query("INSERT INTO rate_limit_hits (id, key, at) VALUES (?, ?, ?)")
                .bind(Uuid::new_v4().to_string())
                .bind(key)
                .bind(now_ms)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn limiter(quota: u32) -> SlidingWindowLimiter {
        let pool = db::memory_pool().await.unwrap();
        SlidingWindowLimiter::new(pool, quota, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn admits_up_to_quota_within_window() {
        let limiter = limiter(60).await;
        limiter.acquire_at("key-a", 40, 1_000).await.unwrap();
        limiter.acquire_at("key-a", 20, 2_000).await.unwrap();

        let err = limiter.acquire_at("key-a", 1, 3_000).await.unwrap_err();
        assert!(matches!(err, RateLimitError::Exceeded { quota: 60, window_secs: 60 }));
    }

    #[tokio::test]
    async fn rejected_batches_consume_nothing() {
        let limiter = limiter(10).await;
        limiter.acquire_at("key-a", 8, 0).await.unwrap();
        assert!(limiter.acquire_at("key-a", 5, 100).await.is_err());
        limiter.acquire_at("key-a", 2, 200).await.unwrap();
    }

    #[tokio::test]
    async fn window_slides_and_keys_are_independent() {
        let limiter = limiter(5).await;
        limiter.acquire_at("key-a", 5, 10_000).await.unwrap();
        assert!(limiter.acquire_at("key-a", 1, 69_999).await.is_err());
        limiter.acquire_at("key-b", 5, 69_999).await.unwrap();

        // first hits fall out of the rolling window
        limiter.acquire_at("key-a", 5, 70_000).await.unwrap();
    }
}
