//! End-to-end tests of the reply pipeline.
//!
//! A queued post id is driven through the real queue, thread finder, reply
//! agent and ledger. Only the social platform and the LLM are in-memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use reply_forge::agents::{ReplyAgent, ReplyAgentConfig};
use reply_forge::cache::{CacheKeying, CacheStore, CachingRepository};
use reply_forge::cli::runtime::{post_cache_key, requeue_post};
use reply_forge::conversation::ConversationThreadFinder;
use reply_forge::error::{FetchError, LlmError};
use reply_forge::ledger::ReplyLedger;
use reply_forge::llm::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};
use reply_forge::repository::{PostLookupRepository, PostSearchRepository};
use reply_forge::scheduler::{
    ItemOutcome, ReplyWorker, SqliteQueue, WorkQueue, WorkerConfig, WorkerDeps,
};
use reply_forge::social::{Post, PostWithContext, SearchQuery, SocialPlatform, User};
use reply_forge::storage::Database;

/// Conversation `R`: alice opens, bob answers, alice asks the bot.
fn conversation() -> HashMap<String, PostWithContext> {
    let root = Post::new("R", "alice", "Rust or Go for a new CLI?", "R");
    let answer = Post::new("A1", "bob", "@alice Rust, for clap alone", "R");
    let seed = Post::new("P1", "alice", "@bob @forge what do you think?", "R");

    [
        PostWithContext::new(root.clone()),
        PostWithContext::new(answer.clone()).replying_to(root),
        PostWithContext::new(seed).replying_to(answer),
    ]
    .into_iter()
    .map(|p| (p.id().to_string(), p))
    .collect()
}

#[derive(Default)]
struct InMemoryPlatform {
    posts: Mutex<HashMap<String, PostWithContext>>,
    queries: Mutex<Vec<String>>,
    replies: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl SocialPlatform for InMemoryPlatform {
    async fn fetch_post(&self, id: &str) -> Result<Option<PostWithContext>, FetchError> {
        Ok(self.posts.lock().unwrap().get(id).cloned())
    }

    async fn search_posts(
        &self,
        query: &str,
        _max_results: usize,
    ) -> Result<Vec<PostWithContext>, FetchError> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.posts.lock().unwrap().get("A1").cloned().into_iter().collect())
    }

    async fn fetch_user(&self, handle: &str) -> Result<Option<User>, FetchError> {
        Ok(Some(User::new("bot-1", handle)))
    }

    async fn fetch_mentions(
        &self,
        _user_id: &str,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PostWithContext>, FetchError> {
        Ok(Vec::new())
    }

    async fn post_reply(&self, text: &str, in_reply_to: &str) -> Result<Post, FetchError> {
        self.replies
            .lock()
            .unwrap()
            .push((in_reply_to.to_string(), text.to_string()));
        Ok(Post::new("B1", "forge", text, "R"))
    }
}

/// LLM returning canned completions in order; errors are rate limits.
struct CannedLlm {
    completions: Mutex<Vec<Result<String, ()>>>,
    prompts: Mutex<Vec<String>>,
}

impl CannedLlm {
    fn new(mut completions: Vec<Result<String, ()>>) -> Self {
        completions.reverse();
        Self {
            completions: Mutex::new(completions),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LlmProvider for CannedLlm {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        if let Some(user) = request.messages.last() {
            self.prompts.lock().unwrap().push(user.content.clone());
        }
        let content = self
            .completions
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Ok(r#"{"reply": "fallback", "skip": false}"#.to_string()))
            .map_err(|_| LlmError::RateLimited("429".to_string()))?;
        Ok(GenerationResponse {
            id: "gen".to_string(),
            model: "test".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage {
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
            },
        })
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    queue: Arc<SqliteQueue>,
    ledger: ReplyLedger,
    cache: CacheStore,
    platform: Arc<InMemoryPlatform>,
    llm: Arc<CannedLlm>,
    worker: ReplyWorker,
}

async fn harness(completions: Vec<Result<String, ()>>) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Database::open(dir.path().join("e2e.db").to_str().expect("utf-8 path"))
        .await
        .expect("open database");

    let queue = Arc::new(SqliteQueue::new(db.pool().clone(), "replyQueue"));
    let ledger = ReplyLedger::new(db.pool().clone());
    let cache = CacheStore::new(db.pool().clone());
    let platform = Arc::new(InMemoryPlatform {
        posts: Mutex::new(conversation()),
        ..Default::default()
    });
    let llm = Arc::new(CannedLlm::new(completions));

    let posts = Arc::new(CachingRepository::<_, str>::new(
        PostLookupRepository::new(platform.clone()),
        cache.clone(),
        CacheKeying::derived(post_cache_key),
        true,
    ));
    let search = CachingRepository::<_, SearchQuery>::new(
        PostSearchRepository::new(platform.clone()),
        cache.clone(),
        CacheKeying::named("search"),
        true,
    );
    let threads = ConversationThreadFinder::new(posts.clone(), Arc::new(search));
    let agent = ReplyAgent::new(llm.clone(), platform.clone(), ReplyAgentConfig::default());

    let worker = ReplyWorker::new(
        WorkerDeps {
            queue: queue.clone(),
            ledger: ledger.clone(),
            posts,
            threads: Arc::new(threads),
            platform: platform.clone(),
            generator: Arc::new(agent),
            filter: None,
        },
        User::new("bot-1", "forge"),
        WorkerConfig::default(),
    );

    Harness {
        _dir: dir,
        queue,
        ledger,
        cache,
        platform,
        llm,
        worker,
    }
}

fn ids(posts: &[PostWithContext]) -> Vec<&str> {
    posts.iter().map(|p| p.id()).collect()
}

#[tokio::test]
async fn test_queued_post_is_answered_and_recorded() {
    let h = harness(vec![Ok(
        r#"{"reply": "@alice Rust, the type system pays off.", "skip": false}"#.to_string(),
    )])
    .await;

    h.queue.enqueue("P1").await.expect("enqueue");
    let run = h.worker.process_queue().await.expect("process");

    assert_eq!(run.attempts, 1);
    assert_eq!(
        run.outcome,
        Some(ItemOutcome::Replied {
            response_id: "B1".to_string()
        })
    );
    assert_eq!(h.queue.count().await.expect("count"), 0);

    let replies = h.platform.replies.lock().unwrap().clone();
    assert_eq!(
        replies,
        vec![("P1".to_string(), "Rust, the type system pays off.".to_string())]
    );

    let queries = h.platform.queries.lock().unwrap().clone();
    assert_eq!(queries.len(), 1);
    assert!(queries[0].starts_with("conversation_id:R"));

    let prompt = h.llm.prompts.lock().unwrap()[0].clone();
    assert!(prompt.contains("Rust or Go for a new CLI?"));
    assert!(prompt.contains("what do you think?"));

    let entry = h.ledger.read("P1").await.expect("read").expect("entry");
    assert!(entry.error.is_none());
    assert_eq!(entry.response.as_ref().map(|r| r.id.as_str()), Some("B1"));
    assert_eq!(ids(&entry.reply_branch_thread), vec!["R", "A1", "P1", "B1"]);
    assert_eq!(ids(&entry.conversation_root_thread), vec!["R"]);
    assert_eq!(entry.participants, vec!["alice", "bob"]);
}

#[tokio::test]
async fn test_answered_post_is_not_answered_twice() {
    let h = harness(Vec::new()).await;

    h.queue.enqueue("P1").await.expect("enqueue");
    h.worker.process_queue().await.expect("first pass");
    h.queue.enqueue("P1").await.expect("enqueue again");
    let run = h.worker.process_queue().await.expect("second pass");

    assert_eq!(run.outcome, Some(ItemOutcome::AlreadyAnswered));
    assert_eq!(h.platform.replies.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_rate_limited_generation_is_retried_next_tick() {
    let h = harness(vec![
        Err(()),
        Err(()),
        Ok(r#"{"reply": "Rust.", "skip": false}"#.to_string()),
    ])
    .await;

    h.queue.enqueue("P1").await.expect("enqueue");
    let run = h.worker.process_queue().await.expect("first pass");
    assert_eq!(run.requeued, 2);
    assert!(run.outcome.is_none());
    assert!(h.ledger.read("P1").await.expect("read").is_none());
    assert_eq!(h.queue.count().await.expect("count"), 1);

    let run = h.worker.process_queue().await.expect("second pass");
    assert!(matches!(run.outcome, Some(ItemOutcome::Replied { .. })));
    assert_eq!(h.queue.count().await.expect("count"), 0);
}

#[tokio::test]
async fn test_missing_post_records_error_until_cleared() {
    let h = harness(Vec::new()).await;

    h.queue.enqueue("missing").await.expect("enqueue");
    let run = h.worker.process_queue().await.expect("process");
    assert_eq!(run.failed, 1);

    let entry = h.ledger.read("missing").await.expect("read").expect("entry");
    assert!(entry.is_error());
    assert!(!entry.is_success());

    assert!(h.ledger.clear_error("missing").await.expect("clear"));
    assert!(h.ledger.read("missing").await.expect("read").is_none());
}

#[tokio::test]
async fn test_retry_refetches_post_that_was_missing() {
    let h = harness(Vec::new()).await;
    let seed = h.platform.posts.lock().unwrap().remove("P1").expect("seed post");

    h.queue.enqueue("P1").await.expect("enqueue");
    let run = h.worker.process_queue().await.expect("first pass");
    assert_eq!(run.failed, 1);
    assert!(h.cache.get(&post_cache_key("P1")).await.expect("get").is_some());

    // The post becomes visible; a plain re-enqueue still hits the recorded failure
    h.platform.posts.lock().unwrap().insert("P1".to_string(), seed);
    h.queue.enqueue("P1").await.expect("enqueue again");
    let run = h.worker.process_queue().await.expect("second pass");
    assert_eq!(run.outcome, Some(ItemOutcome::PreviouslyFailed));
    assert!(h.platform.replies.lock().unwrap().is_empty());

    let requeue = requeue_post(h.queue.as_ref(), &h.ledger, &h.cache, "P1")
        .await
        .expect("requeue");
    assert!(requeue.cleared_error);
    assert!(requeue.dropped_cached_lookup);

    let run = h.worker.process_queue().await.expect("third pass");
    assert!(matches!(run.outcome, Some(ItemOutcome::Replied { .. })));
    assert_eq!(run.failed, 0);

    let entry = h.ledger.read("P1").await.expect("read").expect("entry");
    assert!(entry.is_success());
    assert_eq!(h.platform.replies.lock().unwrap().len(), 1);
}
