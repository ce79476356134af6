//! Post and user types shared by the platform adapter, the conversation
//! builder and the reply ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public engagement counters of a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub reply_count: u64,
    pub like_count: u64,
    pub quote_count: u64,
    pub repost_count: u64,
    #[serde(default)]
    pub impression_count: u64,
}

/// An image attached to a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A single post, without any conversational context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author_handle: String,
    pub text: String,
    pub conversation_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub engagement: Option<Engagement>,
    #[serde(default)]
    pub media: Vec<Media>,
}

impl Post {
    /// Creates a post with no timestamp, engagement or media.
    pub fn new(
        id: impl Into<String>,
        author_handle: impl Into<String>,
        text: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            author_handle: author_handle.into(),
            text: text.into(),
            conversation_id: conversation_id.into(),
            created_at: None,
            engagement: None,
            media: Vec::new(),
        }
    }

    /// Sets the creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Sets the engagement counters.
    pub fn with_engagement(mut self, engagement: Engagement) -> Self {
        self.engagement = Some(engagement);
        self
    }

    /// Attaches a media item.
    pub fn with_media(mut self, media: Media) -> Self {
        self.media.push(media);
        self
    }

    /// Case-insensitive author comparison; handles are not case sensitive.
    pub fn is_authored_by(&self, handle: &str) -> bool {
        self.author_handle.eq_ignore_ascii_case(handle)
    }
}

/// A post together with the posts it directly replies to and quotes.
///
/// Context is one level deep: `reply_to` is a plain [`Post`], never a chain.
/// Longer chains are rebuilt by the conversation builder from repeated
/// single-level fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostWithContext {
    #[serde(flatten)]
    pub post: Post,
    #[serde(default)]
    pub reply_to: Option<Post>,
    #[serde(default)]
    pub quoted: Option<Post>,
}

impl PostWithContext {
    pub fn new(post: Post) -> Self {
        Self {
            post,
            reply_to: None,
            quoted: None,
        }
    }

    /// Sets the post this one replies to.
    pub fn replying_to(mut self, parent: Post) -> Self {
        self.reply_to = Some(parent);
        self
    }

    /// Sets the quoted post.
    pub fn quoting(mut self, quoted: Post) -> Self {
        self.quoted = Some(quoted);
        self
    }

    pub fn id(&self) -> &str {
        &self.post.id
    }

    pub fn author(&self) -> &str {
        &self.post.author_handle
    }

    pub fn conversation_id(&self) -> &str {
        &self.post.conversation_id
    }

    /// Id of the post this one replies to, if any.
    pub fn reply_to_id(&self) -> Option<&str> {
        self.reply_to.as_ref().map(|p| p.id.as_str())
    }
}

impl From<Post> for PostWithContext {
    fn from(post: Post) -> Self {
        Self::new(post)
    }
}

/// A platform account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handle: handle.into(),
            display_name: None,
            description: None,
        }
    }
}

/// Parameters of a post search.
///
/// Used as the input of the search repository, so its JSON form doubles as
/// the cache key material.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: usize,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, max_results: usize) -> Self {
        Self {
            query: query.into(),
            max_results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_with_context_accessors() {
        let parent = Post::new("1", "alice", "root", "1");
        let child = PostWithContext::new(Post::new("2", "bob", "@alice hi", "1")).replying_to(parent);

        assert_eq!(child.id(), "2");
        assert_eq!(child.author(), "bob");
        assert_eq!(child.conversation_id(), "1");
        assert_eq!(child.reply_to_id(), Some("1"));
        assert!(child.quoted.is_none());
    }

    #[test]
    fn test_flattened_serialization() {
        let post = PostWithContext::new(Post::new("2", "bob", "hello", "1"))
            .replying_to(Post::new("1", "alice", "root", "1"));
        let value = serde_json::to_value(&post).expect("serialization should work");

        // Post fields sit at the top level next to the context fields
        assert_eq!(value["id"], "2");
        assert_eq!(value["author_handle"], "bob");
        assert_eq!(value["reply_to"]["id"], "1");

        let back: PostWithContext = serde_json::from_value(value).expect("should parse back");
        assert_eq!(back, post);
    }

    #[test]
    fn test_author_comparison_ignores_case() {
        let post = Post::new("1", "Alice", "hi", "1");
        assert!(post.is_authored_by("alice"));
        assert!(!post.is_authored_by("bob"));
    }
}
