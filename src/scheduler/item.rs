//! Queue item definitions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned to an item when it is enqueued.
///
/// Monotonically increasing per queue, so it breaks ties between items
/// enqueued within the same timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueItemId(pub i64);

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of work in the durable queue.
///
/// The payload is opaque to the queue; the reply worker stores post ids in
/// it. `claimed_at` is set exactly once, by the dequeue that hands the item
/// out. Items are never deleted, so a claimed item that never produced a
/// ledger entry stays visible as outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub payload: String,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Whether a dequeue has handed this item out.
    pub fn is_claimed(&self) -> bool {
        self.claimed_at.is_some()
    }

    /// Time the item waited before being claimed.
    pub fn wait_time(&self) -> Option<chrono::Duration> {
        self.claimed_at.map(|claimed| claimed - self.enqueued_at)
    }
}
