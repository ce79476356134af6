//! Durable work queue with atomic claim-on-dequeue.
//!
//! A queue hands each item to exactly one dequeuer. Dequeue never blocks: it
//! either claims the oldest unclaimed item or returns `None`. Claimed items
//! are kept, not deleted, so work that was handed out but never finished can
//! be told apart from work that was never picked up.
//!
//! # Backends
//!
//! - [`SqliteQueue`]: table `queue_items` in the shared SQLite database. The
//!   claim is a single `UPDATE ... RETURNING` statement.
//! - [`RedisQueue`](super::redis_queue::RedisQueue): pending list plus one
//!   hash per item, claimed by a Lua script.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tokio::sync::Mutex;

use super::item::{QueueItem, QueueItemId};

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to the backend.
    #[error("Queue connection failed: {0}")]
    ConnectionFailed(String),

    /// SQLite operation failed.
    #[error("Database operation failed: {0}")]
    Database(#[from] sqlx::Error),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Payload rejected before it reached storage.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Stored item could not be decoded.
    #[error("Corrupt queue item {id}: {message}")]
    Corrupt { id: String, message: String },
}

/// Operations every queue backend provides.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Name the queue is scoped by.
    fn name(&self) -> &str;

    /// Persists a new unclaimed item and returns its id.
    async fn enqueue(&self, payload: &str) -> Result<QueueItemId, QueueError>;

    /// Claims the oldest unclaimed item, or returns `None` when there is none.
    ///
    /// The find and the claim happen atomically: two concurrent dequeues never
    /// return the same item.
    async fn dequeue(&self) -> Result<Option<QueueItem>, QueueError>;

    /// Returns the oldest unclaimed item without claiming it.
    async fn peek(&self) -> Result<Option<QueueItem>, QueueError>;

    /// Number of unclaimed items.
    async fn count(&self) -> Result<u64, QueueError>;

    /// Whether an unclaimed item with this payload is waiting.
    async fn is_pending(&self, payload: &str) -> Result<bool, QueueError>;
}

pub(crate) fn validate_payload(payload: &str) -> Result<&str, QueueError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(QueueError::InvalidPayload("payload must not be blank".to_string()));
    }
    Ok(trimmed)
}

/// SQLite-backed queue.
///
/// Several queues can share one table; rows are scoped by queue name.
pub struct SqliteQueue {
    pool: SqlitePool,
    queue_name: String,
    /// Serializes claims issued from this process so concurrent dequeues do
    /// not contend on the SQLite write lock. Claims from other processes are
    /// still excluded by the `claimed_at IS NULL` guard in the statement.
    claim_lock: Mutex<()>,
}

impl SqliteQueue {
    /// Creates a queue over an already migrated pool.
    pub fn new(pool: SqlitePool, queue_name: impl Into<String>) -> Self {
        Self {
            pool,
            queue_name: queue_name.into(),
            claim_lock: Mutex::new(()),
        }
    }

    fn row_to_item(row: &SqliteRow) -> Result<QueueItem, QueueError> {
        let id: i64 = row.try_get("id")?;
        Ok(QueueItem {
            id: QueueItemId(id),
            payload: row.try_get("payload")?,
            enqueued_at: row.try_get::<DateTime<Utc>, _>("enqueued_at")?,
            claimed_at: row.try_get::<Option<DateTime<Utc>>, _>("claimed_at")?,
        })
    }

    /// Number of items claimed so far, finished or not.
    pub async fn claimed_count(&self) -> Result<u64, QueueError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_items WHERE queue = ? AND claimed_at IS NOT NULL",
        )
        .bind(&self.queue_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl WorkQueue for SqliteQueue {
    fn name(&self) -> &str {
        &self.queue_name
    }

    async fn enqueue(&self, payload: &str) -> Result<QueueItemId, QueueError> {
        let payload = validate_payload(payload)?;

        // RETURNING statements are stepped to completion so the implicit
        // transaction commits before the id is handed back.
        let id: i64 = sqlx::query_scalar::<_, i64>(
            "INSERT INTO queue_items (queue, payload, enqueued_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(&self.queue_name)
        .bind(payload)
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .next()
        .ok_or(sqlx::Error::RowNotFound)?;

        tracing::debug!(queue = %self.queue_name, item_id = id, payload = %payload, "Item enqueued");
        Ok(QueueItemId(id))
    }

    async fn dequeue(&self) -> Result<Option<QueueItem>, QueueError> {
        let _guard = self.claim_lock.lock().await;

        let rows = sqlx::query(
            r#"
            UPDATE queue_items
            SET claimed_at = ?
            WHERE id = (
                SELECT id FROM queue_items
                WHERE queue = ? AND claimed_at IS NULL
                ORDER BY enqueued_at, id
                LIMIT 1
            )
            AND claimed_at IS NULL
            RETURNING id, payload, enqueued_at, claimed_at
            "#,
        )
        .bind(Utc::now())
        .bind(&self.queue_name)
        .fetch_all(&self.pool)
        .await?;

        match rows.first() {
            Some(row) => {
                let item = Self::row_to_item(row)?;
                tracing::debug!(queue = %self.queue_name, item_id = %item.id, "Item claimed");
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    async fn peek(&self) -> Result<Option<QueueItem>, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT id, payload, enqueued_at, claimed_at FROM queue_items
            WHERE queue = ? AND claimed_at IS NULL
            ORDER BY enqueued_at, id
            LIMIT 1
            "#,
        )
        .bind(&self.queue_name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_item).transpose()
    }

    async fn count(&self) -> Result<u64, QueueError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_items WHERE queue = ? AND claimed_at IS NULL",
        )
        .bind(&self.queue_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn is_pending(&self, payload: &str) -> Result<bool, QueueError> {
        let exists: i64 = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM queue_items
                WHERE queue = ? AND payload = ? AND claimed_at IS NULL
            )
            "#,
        )
        .bind(&self.queue_name)
        .bind(payload.trim())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists != 0)
    }
}
