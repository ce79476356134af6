//! Durable work queue and the reply worker.
//!
//! - **WorkQueue**: at-least-once queue of post ids with an atomic
//!   claim-on-dequeue. Backed by SQLite ([`SqliteQueue`]) or Redis
//!   ([`RedisQueue`]).
//! - **ReplyWorker**: the tick loop that drains the queue and runs the
//!   mention and topic-search producers.
//!
//! # Architecture
//!
//! ```text
//!   mentions   topic search   HTTP / CLI
//!       │            │             │
//!       └────────────┼─────────────┘
//!                    ▼
//!             ┌─────────────┐
//!             │  WorkQueue  │  claimed_at set on dequeue
//!             └──────┬──────┘
//!                    ▼
//!             ┌─────────────┐    transient: re-enqueue
//!             │ ReplyWorker │──► permanent: ledger error
//!             └──────┬──────┘
//!                    ▼
//!     threads → generator → ledger
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use reply_forge::scheduler::{SqliteQueue, WorkQueue};
//! use reply_forge::storage::Database;
//!
//! let db = Database::open("reply_forge.db").await?;
//! let queue = SqliteQueue::new(db.pool().clone(), "replyQueue");
//! queue.enqueue("1850000000000000000").await?;
//!
//! if let Some(item) = queue.dequeue().await? {
//!     println!("claimed {} at {:?}", item.payload, item.claimed_at);
//! }
//! ```

pub mod item;
pub mod queue;
pub mod redis_queue;
pub mod worker;

pub use item::{QueueItem, QueueItemId};
pub use queue::{QueueError, SqliteQueue, WorkQueue};
pub use redis_queue::RedisQueue;
pub use worker::{
    ItemOutcome, QueueRun, ReplyWorker, WorkerConfig, WorkerDeps, WorkerError, WorkerStats,
    TOPIC_SEARCH_LIMIT,
};
