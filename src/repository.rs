//! The read capability shared by lookups, caches and the conversation builder.
//!
//! Everything that turns an input into a (possibly expensive) output goes
//! through [`Repository`]. The read-through cache decorates any repository,
//! and the conversation builder only sees repositories, never the platform
//! client itself.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::social::{PostWithContext, SearchQuery, SocialPlatform, User};

/// A fallible, asynchronous lookup from `I` to [`Repository::Output`].
///
/// `C` is optional per-call context that does not take part in caching.
#[async_trait]
pub trait Repository<I, C = ()>: Send + Sync
where
    I: ?Sized + Sync,
    C: ?Sized + Sync,
{
    type Output: Send;

    async fn read(&self, input: &I, context: Option<&C>) -> Result<Self::Output, FetchError>;
}

#[async_trait]
impl<I, C, R> Repository<I, C> for Arc<R>
where
    I: ?Sized + Sync,
    C: ?Sized + Sync,
    R: Repository<I, C> + ?Sized,
{
    type Output = R::Output;

    async fn read(&self, input: &I, context: Option<&C>) -> Result<Self::Output, FetchError> {
        (**self).read(input, context).await
    }
}

/// Single-post lookup by id.
pub type PostLookup = dyn Repository<str, Output = Option<PostWithContext>>;

/// Post search.
pub type PostSearch = dyn Repository<SearchQuery, Output = Vec<PostWithContext>>;

/// Account lookup by handle.
pub type UserLookup = dyn Repository<str, Output = Option<User>>;

/// Exposes [`SocialPlatform::fetch_post`] as a repository.
pub struct PostLookupRepository {
    platform: Arc<dyn SocialPlatform>,
}

impl PostLookupRepository {
    pub fn new(platform: Arc<dyn SocialPlatform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Repository<str> for PostLookupRepository {
    type Output = Option<PostWithContext>;

    async fn read(&self, id: &str, _context: Option<&()>) -> Result<Self::Output, FetchError> {
        if id.trim().is_empty() {
            return Err(FetchError::InvalidInput("post id must not be blank".to_string()));
        }
        self.platform.fetch_post(id.trim()).await
    }
}

/// Exposes [`SocialPlatform::search_posts`] as a repository.
pub struct PostSearchRepository {
    platform: Arc<dyn SocialPlatform>,
}

impl PostSearchRepository {
    pub fn new(platform: Arc<dyn SocialPlatform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Repository<SearchQuery> for PostSearchRepository {
    type Output = Vec<PostWithContext>;

    async fn read(
        &self,
        query: &SearchQuery,
        _context: Option<&()>,
    ) -> Result<Self::Output, FetchError> {
        self.platform.search_posts(&query.query, query.max_results).await
    }
}

/// Exposes [`SocialPlatform::fetch_user`] as a repository.
pub struct UserLookupRepository {
    platform: Arc<dyn SocialPlatform>,
}

impl UserLookupRepository {
    pub fn new(platform: Arc<dyn SocialPlatform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Repository<str> for UserLookupRepository {
    type Output = Option<User>;

    async fn read(&self, handle: &str, _context: Option<&()>) -> Result<Self::Output, FetchError> {
        let handle = handle.trim().trim_start_matches('@');
        if handle.is_empty() {
            return Err(FetchError::InvalidInput("handle must not be blank".to_string()));
        }
        self.platform.fetch_user(handle).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    use crate::social::Post;

    /// Platform that records the calls it receives.
    #[derive(Default)]
    struct RecordingPlatform {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SocialPlatform for RecordingPlatform {
        async fn fetch_post(&self, id: &str) -> Result<Option<PostWithContext>, FetchError> {
            self.calls.lock().unwrap().push(format!("post:{id}"));
            Ok(Some(Post::new(id, "alice", "hello", id).into()))
        }

        async fn search_posts(
            &self,
            query: &str,
            max_results: usize,
        ) -> Result<Vec<PostWithContext>, FetchError> {
            self.calls.lock().unwrap().push(format!("search:{query}:{max_results}"));
            Ok(Vec::new())
        }

        async fn fetch_user(&self, handle: &str) -> Result<Option<User>, FetchError> {
            self.calls.lock().unwrap().push(format!("user:{handle}"));
            Ok(Some(User::new("u1", handle)))
        }

        async fn fetch_mentions(
            &self,
            _user_id: &str,
            _since: Option<DateTime<Utc>>,
        ) -> Result<Vec<PostWithContext>, FetchError> {
            Ok(Vec::new())
        }

        async fn post_reply(&self, text: &str, _in_reply_to: &str) -> Result<Post, FetchError> {
            Ok(Post::new("r1", "bot", text, "c"))
        }
    }

    #[tokio::test]
    async fn test_adapters_forward_to_platform() {
        let platform = Arc::new(RecordingPlatform::default());
        let dyn_platform: Arc<dyn SocialPlatform> = platform.clone();

        let posts: Arc<PostLookup> = Arc::new(PostLookupRepository::new(dyn_platform.clone()));
        let found = posts.read(" 42 ", None).await.expect("lookup");
        assert_eq!(found.map(|p| p.post.id), Some("42".to_string()));

        let search = PostSearchRepository::new(dyn_platform.clone());
        search
            .read(&SearchQuery::new("from:alice", 15), None)
            .await
            .expect("search");

        let users = UserLookupRepository::new(dyn_platform);
        let user = users.read("@bob", None).await.expect("user").expect("found");
        assert_eq!(user.handle, "bob");

        let calls = platform.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["post:42", "search:from:alice:15", "user:bob"]);
    }

    #[tokio::test]
    async fn test_blank_inputs_are_permanent_errors() {
        let platform: Arc<dyn SocialPlatform> = Arc::new(RecordingPlatform::default());

        let err = PostLookupRepository::new(platform.clone())
            .read("  ", None)
            .await
            .expect_err("blank id");
        assert!(matches!(err, FetchError::InvalidInput(_)));
        assert!(!err.is_transient());

        let err = UserLookupRepository::new(platform)
            .read("@", None)
            .await
            .expect_err("blank handle");
        assert!(matches!(err, FetchError::InvalidInput(_)));
    }
}
