//! Redis-backed work queue.
//!
//! # Key layout
//!
//! - `{queue}:seq`: item id counter
//! - `{queue}:pending`: list of unclaimed item ids, oldest at the head
//! - `{queue}:claimed`: list of claimed item ids
//! - `{queue}:item:{id}`: hash with `payload`, `enqueued_at`, `claimed_at`
//! - `{queue}:pending_payloads`: hash of payload to unclaimed copy count
//!
//! The claim is a Lua script, so popping the id, stamping `claimed_at` and
//! recording the claim happen as one atomic step on the server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use super::item::{QueueItem, QueueItemId};
use super::queue::{validate_payload, QueueError, WorkQueue};

const CLAIM_SCRIPT: &str = r#"
local id = redis.call('LPOP', KEYS[1])
if not id then
    return nil
end
local key = ARGV[2] .. id
redis.call('HSET', key, 'claimed_at', ARGV[1])
redis.call('RPUSH', KEYS[2], id)
local payload = redis.call('HGET', key, 'payload')
if payload then
    local left = redis.call('HINCRBY', KEYS[3], payload, -1)
    if left <= 0 then
        redis.call('HDEL', KEYS[3], payload)
    end
end
return {id, payload or '', redis.call('HGET', key, 'enqueued_at') or ''}
"#;

/// Queue stored in Redis.
pub struct RedisQueue {
    redis: ConnectionManager,
    queue_name: String,
    claim: Script,
}

impl RedisQueue {
    /// Connects to Redis and creates a queue.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, queue_name))
    }

    /// Creates a queue over an existing connection.
    pub fn from_connection(redis: ConnectionManager, queue_name: &str) -> Self {
        Self {
            redis,
            queue_name: queue_name.to_string(),
            claim: Script::new(CLAIM_SCRIPT),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.queue_name, suffix)
    }

    fn item_prefix(&self) -> String {
        format!("{}:item:", self.queue_name)
    }

    fn parse_timestamp(id: &str, value: &str) -> Result<DateTime<Utc>, QueueError> {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| QueueError::Corrupt {
                id: id.to_string(),
                message: format!("bad timestamp '{value}': {e}"),
            })
    }

    /// Number of items claimed so far.
    pub async fn claimed_count(&self) -> Result<u64, QueueError> {
        let mut conn = self.redis.clone();
        let len: u64 = conn.llen(self.key("claimed")).await?;
        Ok(len)
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    fn name(&self) -> &str {
        &self.queue_name
    }

    async fn enqueue(&self, payload: &str) -> Result<QueueItemId, QueueError> {
        let payload = validate_payload(payload)?;
        let mut conn = self.redis.clone();

        let id: i64 = conn.incr(self.key("seq"), 1).await?;
        let item_key = format!("{}{}", self.item_prefix(), id);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(&item_key, "payload", payload)
            .hset(&item_key, "enqueued_at", Utc::now().to_rfc3339())
            .hincr(self.key("pending_payloads"), payload, 1)
            .rpush(self.key("pending"), id);
        pipe.query_async::<_, ()>(&mut conn).await?;

        tracing::debug!(queue = %self.queue_name, item_id = id, payload = %payload, "Item enqueued");
        Ok(QueueItemId(id))
    }

    async fn dequeue(&self) -> Result<Option<QueueItem>, QueueError> {
        let mut conn = self.redis.clone();
        let claimed_at = Utc::now();

        let claimed: Option<(String, String, String)> = self
            .claim
            .key(self.key("pending"))
            .key(self.key("claimed"))
            .key(self.key("pending_payloads"))
            .arg(claimed_at.to_rfc3339())
            .arg(self.item_prefix())
            .invoke_async(&mut conn)
            .await?;

        let Some((id, payload, enqueued_at)) = claimed else {
            return Ok(None);
        };

        let numeric_id = id.parse::<i64>().map_err(|e| QueueError::Corrupt {
            id: id.clone(),
            message: e.to_string(),
        })?;

        tracing::debug!(queue = %self.queue_name, item_id = numeric_id, "Item claimed");
        Ok(Some(QueueItem {
            id: QueueItemId(numeric_id),
            payload,
            enqueued_at: Self::parse_timestamp(&id, &enqueued_at)?,
            claimed_at: Some(claimed_at),
        }))
    }

    async fn peek(&self) -> Result<Option<QueueItem>, QueueError> {
        let mut conn = self.redis.clone();

        let head: Option<String> = conn.lindex(self.key("pending"), 0).await?;
        let Some(id) = head else {
            return Ok(None);
        };

        let item_key = format!("{}{}", self.item_prefix(), id);
        let (payload, enqueued_at): (Option<String>, Option<String>) = redis::pipe()
            .hget(&item_key, "payload")
            .hget(&item_key, "enqueued_at")
            .query_async(&mut conn)
            .await?;

        // Claimed between the two reads
        let (Some(payload), Some(enqueued_at)) = (payload, enqueued_at) else {
            return Ok(None);
        };

        let numeric_id = id.parse::<i64>().map_err(|e| QueueError::Corrupt {
            id: id.clone(),
            message: e.to_string(),
        })?;

        Ok(Some(QueueItem {
            id: QueueItemId(numeric_id),
            payload,
            enqueued_at: Self::parse_timestamp(&id, &enqueued_at)?,
            claimed_at: None,
        }))
    }

    async fn count(&self) -> Result<u64, QueueError> {
        let mut conn = self.redis.clone();
        let len: u64 = conn.llen(self.key("pending")).await?;
        Ok(len)
    }

    async fn is_pending(&self, payload: &str) -> Result<bool, QueueError> {
        let mut conn = self.redis.clone();
        let copies: Option<i64> = conn
            .hget(self.key("pending_payloads"), payload.trim())
            .await?;
        Ok(copies.unwrap_or(0) > 0)
    }
}
