//! SQLite table behind the read-through cache.

use chrono::Utc;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::error::FetchError;

/// Errors raised by the cache table.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CacheError> for FetchError {
    fn from(e: CacheError) -> Self {
        FetchError::Storage(e.to_string())
    }
}

/// Key/value store over the `cache_entries` table.
#[derive(Clone)]
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns the raw JSON stored under `key`.
    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM cache_entries WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub async fn put(&self, key: &str, value: &str) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, created_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                created_at = excluded.created_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Removes the entry under `key`. Returns whether one existed.
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of stored entries.
    pub async fn len(&self) -> Result<u64, CacheError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
