//! Generation boundary of the reply pipeline.
//!
//! The worker only talks to two traits: [`ReplyGenerator`], which turns a
//! seed post and its reconstructed threads into a reply, and [`PostFilter`],
//! which picks posts worth answering out of a topic search. [`ReplyAgent`]
//! and [`PostFinder`] are the reference implementations on top of an
//! [`LlmProvider`](crate::llm::LlmProvider).

pub mod post_finder;
pub mod prompts;
pub mod reply_agent;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::ThreadResult;
use crate::error::GenerationError;
use crate::ledger::LedgerEntry;
use crate::social::{PostWithContext, User};

pub use post_finder::{PostFinder, PostFinderConfig};
pub use prompts::{FinderPrompt, ReplyPrompt};
pub use reply_agent::{ReplyAgent, ReplyAgentConfig, MAX_REPLY_CHARS};

/// Everything needed to answer one seed post.
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    /// Correlates log lines of one item across components.
    pub trace_id: Uuid,
    /// The account replying.
    pub bot: User,
    pub seed: PostWithContext,
    pub threads: ThreadResult,
    /// Earlier ledger entries with the same participants, most recent first.
    pub history: Vec<LedgerEntry>,
}

/// A reply that was published, or would have been.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedReply {
    pub id: String,
    pub text: String,
    /// True when posting is disabled and nothing reached the platform.
    pub dry_run: bool,
}

/// Result of a generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyOutcome {
    /// Reply text as produced by the model, after cleanup.
    pub text: String,
    /// `None` when the generator decided not to answer.
    pub posted: Option<PostedReply>,
}

impl ReplyOutcome {
    /// Whether a reply actually reached the platform.
    pub fn is_published(&self) -> bool {
        self.posted.as_ref().is_some_and(|p| !p.dry_run)
    }
}

/// A post picked by a [`PostFilter`], with the model's reasoning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub post: PostWithContext,
    pub reason: String,
}

/// Produces (and normally publishes) a reply for a seed post.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate_reply(&self, request: ReplyRequest) -> Result<ReplyOutcome, GenerationError>;
}

/// Chooses which candidate posts are worth answering.
#[async_trait]
pub trait PostFilter: Send + Sync {
    async fn select(
        &self,
        candidates: Vec<PostWithContext>,
    ) -> Result<Vec<Selection>, GenerationError>;
}
