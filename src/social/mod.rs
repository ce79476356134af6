//! Social platform boundary.
//!
//! The core only depends on the [`SocialPlatform`] trait. [`XApiClient`] is a
//! thin reference adapter for the X API v2; anything implementing the trait
//! can stand in for it.
//!
//! Errors distinguish rate limiting and timeouts (transient, see
//! [`FetchError::is_transient`](crate::error::FetchError::is_transient)) from
//! every other failure (permanent).

pub mod render;
pub mod types;
pub mod x_api;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::FetchError;

pub use render::{format_post, format_posts, strip_leading_mentions, RenderOptions};
pub use types::{Engagement, Media, Post, PostWithContext, SearchQuery, User};
pub use x_api::XApiClient;

/// Operations the reply pipeline needs from a social platform.
#[async_trait]
pub trait SocialPlatform: Send + Sync {
    /// Fetches a single post with its reply/quote context.
    async fn fetch_post(&self, id: &str) -> Result<Option<PostWithContext>, FetchError>;

    /// Runs a search query, returning at most `max_results` posts.
    async fn search_posts(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<PostWithContext>, FetchError>;

    /// Looks up an account by handle.
    async fn fetch_user(&self, handle: &str) -> Result<Option<User>, FetchError>;

    /// Returns posts mentioning `user_id`, optionally only those after `since`.
    async fn fetch_mentions(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PostWithContext>, FetchError>;

    /// Publishes `text` as a reply to `in_reply_to`.
    async fn post_reply(&self, text: &str, in_reply_to: &str) -> Result<Post, FetchError>;
}
