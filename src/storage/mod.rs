//! SQLite persistence shared by the queue, cache and reply ledger.
//!
//! # Usage
//!
//! ```rust,ignore
//! use reply_forge::storage::Database;
//!
//! // Opens the file, enables WAL and applies pending migrations
//! let db = Database::open("reply_forge.db").await?;
//! let queue = SqliteQueue::new(db.pool().clone(), "replyQueue");
//! ```

pub mod database;
pub mod migrations;
pub mod schema;

pub use database::{Database, DatabaseError};
pub use migrations::{AppliedMigration, MigrationError, MigrationRunner};
pub use schema::{Migration, MIGRATIONS};
