//! Wiring of the storage, cache and platform components used by commands.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::cache::{CacheKeying, CacheStore, CachingRepository};
use crate::config::BotConfig;
use crate::conversation::ConversationThreadFinder;
use crate::ledger::ReplyLedger;
use crate::repository::{
    PostLookupRepository, PostSearchRepository, Repository, UserLookupRepository,
};
use crate::scheduler::{QueueItemId, RedisQueue, SqliteQueue, WorkQueue};
use crate::social::{SearchQuery, User, XApiClient};
use crate::storage::Database;

/// Cache-wrapped single post lookup.
pub type CachedPosts = CachingRepository<PostLookupRepository, str>;

/// Storage-side components sharing one database.
pub struct Storage {
    pub db: Database,
    pub queue: Arc<dyn WorkQueue>,
    pub ledger: ReplyLedger,
    pub cache: CacheStore,
}

impl Storage {
    /// Opens the database and the configured queue backend.
    pub async fn open(config: &BotConfig) -> anyhow::Result<Self> {
        let path = config.database_path_str()?;
        let db = Database::open(path)
            .await
            .with_context(|| format!("failed to open database {path}"))?;

        let queue: Arc<dyn WorkQueue> = match &config.redis_url {
            Some(url) => {
                info!(queue = %config.queue_name, "Using Redis queue");
                Arc::new(RedisQueue::connect(url, &config.queue_name).await?)
            }
            None => Arc::new(SqliteQueue::new(db.pool().clone(), config.queue_name.clone())),
        };

        Ok(Self {
            ledger: ReplyLedger::new(db.pool().clone()),
            cache: CacheStore::new(db.pool().clone()),
            queue,
            db,
        })
    }
}

/// What [`requeue_post`] changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requeue {
    pub item_id: QueueItemId,
    pub cleared_error: bool,
    pub dropped_cached_lookup: bool,
    pub already_replied: bool,
}

/// Queues a post for another attempt.
///
/// A recorded failure is cleared and the cached lookup of the post is
/// dropped first, so the worker fetches it again instead of replaying a
/// cached absence.
pub async fn requeue_post(
    queue: &dyn WorkQueue,
    ledger: &ReplyLedger,
    cache: &CacheStore,
    post_id: &str,
) -> anyhow::Result<Requeue> {
    let post_id = post_id.trim();
    let cleared_error = ledger.clear_error(post_id).await?;
    let dropped_cached_lookup = cache.delete(&post_cache_key(post_id)).await?;
    let already_replied = ledger
        .read(post_id)
        .await?
        .is_some_and(|entry| entry.is_success());
    let item_id = queue.enqueue(post_id).await?;

    info!(
        post_id = %post_id,
        item_id = %item_id,
        cleared_error,
        dropped_cached_lookup,
        "Post requeued"
    );
    Ok(Requeue {
        item_id,
        cleared_error,
        dropped_cached_lookup,
        already_replied,
    })
}

/// Builds the X API client from configuration.
pub fn build_platform(config: &BotConfig) -> anyhow::Result<Arc<XApiClient>> {
    let token = config.require_bearer_token()?;
    let client = XApiClient::new(
        config.x_api_base.clone(),
        token.to_string(),
        config.x_user_token.clone(),
    );
    if config.toggles.post_enabled && !client.can_post() {
        warn!("X_USER_TOKEN not set; replies will be generated as dry runs");
    }
    Ok(Arc::new(client))
}

/// Cache key of a post lookup.
pub fn post_cache_key(id: &str) -> String {
    format!("post:{}", id.trim())
}

/// Cache-wrapped post lookup.
pub fn cached_posts(platform: Arc<XApiClient>, cache: CacheStore, enabled: bool) -> CachedPosts {
    CachingRepository::new(
        PostLookupRepository::new(platform),
        cache,
        CacheKeying::derived(post_cache_key),
        enabled,
    )
}

/// Thread finder over cache-wrapped lookups.
pub fn thread_finder(
    posts: Arc<CachedPosts>,
    platform: Arc<XApiClient>,
    cache: CacheStore,
    enabled: bool,
) -> ConversationThreadFinder {
    let search = CachingRepository::<_, SearchQuery>::new(
        PostSearchRepository::new(platform),
        cache,
        CacheKeying::named("search"),
        enabled,
    );
    ConversationThreadFinder::new(posts, Arc::new(search))
}

/// Resolves the bot account by handle, through the cache.
pub async fn resolve_bot(
    handle: &str,
    platform: Arc<XApiClient>,
    cache: CacheStore,
    enabled: bool,
) -> anyhow::Result<User> {
    let users = CachingRepository::<_, str>::new(
        UserLookupRepository::new(platform),
        cache,
        CacheKeying::derived(|h: &str| format!("user:{}", h.trim_start_matches('@').to_lowercase())),
        enabled,
    );
    users
        .read(handle, None)
        .await?
        .with_context(|| format!("bot account @{handle} not found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_storage_opens_sqlite_queue() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = BotConfig::default().with_database_path(dir.path().join("cli.db"));

        let storage = Storage::open(&config).await.expect("open");
        assert_eq!(storage.queue.name(), "replyQueue");
        storage.queue.enqueue("1").await.expect("enqueue");
        assert_eq!(storage.queue.count().await.expect("count"), 1);
        assert!(storage.ledger.read("1").await.expect("read").is_none());
    }

    #[test]
    fn test_build_platform_requires_token() {
        assert!(build_platform(&BotConfig::default()).is_err());

        let mut config = BotConfig::default();
        config.x_bearer_token = Some("token".to_string());
        let platform = build_platform(&config).expect("platform");
        assert!(!platform.can_post());
    }

    #[tokio::test]
    async fn test_post_cache_key_matches_invalidation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = BotConfig::default().with_database_path(dir.path().join("cli.db"));
        let storage = Storage::open(&config).await.expect("open");

        let mut config = BotConfig::default();
        config.x_bearer_token = Some("token".to_string());
        let posts = cached_posts(build_platform(&config).expect("platform"), storage.cache.clone(), true);

        assert_eq!(posts.key_for(" 42 ").expect("key"), "post:42");
        storage.cache.put("post:42", "null").await.expect("put");
        assert!(posts.invalidate("42").await.expect("invalidate"));
    }

    #[tokio::test]
    async fn test_requeue_clears_failure_and_cached_absence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = BotConfig::default().with_database_path(dir.path().join("cli.db"));
        let storage = Storage::open(&config).await.expect("open");

        storage
            .ledger
            .record_error("42", "Fetch failed: Post '42' not found")
            .await
            .expect("record");
        storage.cache.put("post:42", "null").await.expect("put");
        storage.cache.put("post:7", "null").await.expect("put");

        let requeue = requeue_post(storage.queue.as_ref(), &storage.ledger, &storage.cache, " 42 ")
            .await
            .expect("requeue");
        assert!(requeue.cleared_error);
        assert!(requeue.dropped_cached_lookup);
        assert!(!requeue.already_replied);

        assert!(storage.ledger.read("42").await.expect("read").is_none());
        assert!(storage.cache.get("post:42").await.expect("get").is_none());
        assert!(storage.cache.get("post:7").await.expect("get").is_some());
        assert!(storage.queue.is_pending("42").await.expect("pending"));

        let again = requeue_post(storage.queue.as_ref(), &storage.ledger, &storage.cache, "42")
            .await
            .expect("requeue");
        assert!(!again.cleared_error);
        assert!(!again.dropped_cached_lookup);
        assert_eq!(storage.queue.count().await.expect("count"), 2);
    }
}
