//! reply-forge: a queue-driven reply bot for X conversations.
//!
//! Post ids enter a durable queue (HTTP ingress, mention scans or topic
//! search). A worker reconstructs the conversation around each post,
//! generates a reply with an LLM, publishes it and records the outcome in
//! the reply ledger.

pub mod agents;
pub mod cache;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod error;
pub mod ledger;
pub mod llm;
pub mod repository;
pub mod scheduler;
pub mod server;
pub mod social;
pub mod storage;
pub mod utils;

// Re-export commonly used error types
pub use cache::CacheError;
pub use config::ConfigError;
pub use error::{FetchError, GenerationError, LlmError};
pub use ledger::LedgerError;
pub use scheduler::{QueueError, WorkerError};
pub use server::ServerError;
pub use storage::DatabaseError;
