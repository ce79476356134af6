//! The reply worker loop.
//!
//! Each tick optionally runs the producers (topic search, mention scan) and
//! then drains the queue until one item is handled or the retry budget runs
//! out:
//!
//! - transient failures (rate limit, timeout) put the post id back at the end
//!   of the queue and use up one attempt
//! - permanent failures are recorded in the ledger and end the tick
//! - storage failures end the tick with an error; the claimed item is left
//!   outstanding in the queue

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::item::QueueItem;
use super::queue::{QueueError, WorkQueue};
use crate::agents::{PostFilter, ReplyGenerator, ReplyRequest};
use crate::config::{BotConfig, FeatureToggles, FollowList};
use crate::conversation::ThreadLookup;
use crate::error::{FetchError, GenerationError};
use crate::ledger::{LedgerEntry, LedgerError, ReplyLedger, ResponsePost};
use crate::repository::PostLookup;
use crate::social::{Post, PostWithContext, SocialPlatform, User};

/// Maximum number of posts fetched by one topic search.
pub const TOPIC_SEARCH_LIMIT: usize = 15;

/// Errors that can occur while handling queue items.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),
}

impl WorkerError {
    /// Whether the item should go back on the queue.
    pub fn is_transient(&self) -> bool {
        match self {
            WorkerError::Fetch(e) => e.is_transient(),
            WorkerError::Generation(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether local storage failed, as opposed to the item itself.
    pub fn is_storage(&self) -> bool {
        match self {
            WorkerError::Queue(_) | WorkerError::Ledger(_) => true,
            WorkerError::Fetch(e) => e.is_storage(),
            WorkerError::Generation(GenerationError::Platform(e)) => e.is_storage(),
            _ => false,
        }
    }
}

/// Configuration for [`ReplyWorker`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Dequeue attempts per tick.
    pub retry_budget: u32,
    pub mention_every_min: u32,
    pub search_every_min: u32,
    /// Earlier interactions handed to the generator.
    pub history_limit: usize,
    pub tick_interval: Duration,
    pub toggles: FeatureToggles,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_budget: 2,
            mention_every_min: 4,
            search_every_min: 30,
            history_limit: 4,
            tick_interval: Duration::from_secs(60),
            toggles: FeatureToggles::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_bot_config(config: &BotConfig) -> Self {
        Self {
            retry_budget: config.retry_budget,
            mention_every_min: config.mention_every_min,
            search_every_min: config.search_every_min,
            history_limit: config.history_limit,
            tick_interval: config.tick_interval,
            toggles: config.toggles,
        }
    }

    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_toggles(mut self, toggles: FeatureToggles) -> Self {
        self.toggles = toggles;
        self
    }
}

/// What happened to a dequeued item that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// A reply was published.
    Replied { response_id: String },
    /// The ledger already had a reply for the post.
    AlreadyAnswered,
    /// The ledger holds a recorded failure for the post; it stays skipped
    /// until the failure is cleared.
    PreviouslyFailed,
    /// A reply was generated but posting is disabled.
    DryRun,
    /// The generator chose not to answer.
    Declined,
}

/// Result of one pass over the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueRun {
    /// Items dequeued.
    pub attempts: u32,
    /// Items put back after a transient failure.
    pub requeued: u32,
    /// Items recorded as permanently failed.
    pub failed: u32,
    pub outcome: Option<ItemOutcome>,
}

/// Snapshot of the worker's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub ticks: u64,
    pub replied: u64,
    pub already_answered: u64,
    pub previously_failed: u64,
    pub dry_runs: u64,
    pub declined: u64,
    pub transient_failures: u64,
    pub permanent_failures: u64,
    pub enqueued_by_scans: u64,
}

#[derive(Default)]
struct SharedStats {
    ticks: AtomicU64,
    replied: AtomicU64,
    already_answered: AtomicU64,
    previously_failed: AtomicU64,
    dry_runs: AtomicU64,
    declined: AtomicU64,
    transient_failures: AtomicU64,
    permanent_failures: AtomicU64,
    enqueued_by_scans: AtomicU64,
}

impl SharedStats {
    fn record_outcome(&self, outcome: &ItemOutcome) {
        let counter = match outcome {
            ItemOutcome::Replied { .. } => &self.replied,
            ItemOutcome::AlreadyAnswered => &self.already_answered,
            ItemOutcome::PreviouslyFailed => &self.previously_failed,
            ItemOutcome::DryRun => &self.dry_runs,
            ItemOutcome::Declined => &self.declined,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            ticks: self.ticks.load(Ordering::SeqCst),
            replied: self.replied.load(Ordering::SeqCst),
            already_answered: self.already_answered.load(Ordering::SeqCst),
            previously_failed: self.previously_failed.load(Ordering::SeqCst),
            dry_runs: self.dry_runs.load(Ordering::SeqCst),
            declined: self.declined.load(Ordering::SeqCst),
            transient_failures: self.transient_failures.load(Ordering::SeqCst),
            permanent_failures: self.permanent_failures.load(Ordering::SeqCst),
            enqueued_by_scans: self.enqueued_by_scans.load(Ordering::SeqCst),
        }
    }
}

/// Collaborators of the worker.
pub struct WorkerDeps {
    pub queue: Arc<dyn WorkQueue>,
    pub ledger: ReplyLedger,
    /// Seed lookup, normally cache-wrapped.
    pub posts: Arc<PostLookup>,
    pub threads: Arc<ThreadLookup>,
    pub platform: Arc<dyn SocialPlatform>,
    pub generator: Arc<dyn ReplyGenerator>,
    /// Topic search is skipped without a filter.
    pub filter: Option<Arc<dyn PostFilter>>,
}

/// Drives queued post ids through thread reconstruction, generation and the
/// ledger.
pub struct ReplyWorker {
    deps: WorkerDeps,
    bot: User,
    follow: FollowList,
    config: WorkerConfig,
    running: AtomicBool,
    wake: Notify,
    last_mention_scan: Mutex<Option<DateTime<Utc>>>,
    stats: SharedStats,
}

impl ReplyWorker {
    pub fn new(deps: WorkerDeps, bot: User, config: WorkerConfig) -> Self {
        Self {
            deps,
            bot,
            follow: FollowList::default(),
            config,
            running: AtomicBool::new(false),
            wake: Notify::new(),
            last_mention_scan: Mutex::new(None),
            stats: SharedStats::default(),
        }
    }

    /// Handles searched by [`ReplyWorker::search_for_posts`].
    pub fn with_follow_list(mut self, follow: FollowList) -> Self {
        self.follow = follow;
        self
    }

    pub fn bot(&self) -> &User {
        &self.bot
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs ticks until [`ReplyWorker::stop`] is called.
    ///
    /// Failures are logged; nothing that happens to a single item stops
    /// the loop. A tick in progress always completes.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!(
            bot = %self.bot.handle,
            queue = %self.deps.queue.name(),
            interval_secs = self.config.tick_interval.as_secs(),
            "Worker started"
        );

        while self.is_running() {
            if let Err(e) = self.tick_at(Utc::now()).await {
                error!(error = %e, storage = e.is_storage(), "Tick failed");
            }

            if !self.is_running() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval) => {}
                _ = self.wake.notified() => {}
            }
        }

        info!(bot = %self.bot.handle, "Worker stopped");
    }

    /// Asks the loop to stop after the current tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Runs one tick as if the clock read `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<QueueRun, WorkerError> {
        self.stats.ticks.fetch_add(1, Ordering::SeqCst);
        let minute = now.minute();

        if minute % self.config.search_every_min.max(1) == 0 {
            match self.search_for_posts().await {
                Ok(n) => debug!(enqueued = n, "Topic search done"),
                Err(e) => warn!(error = %e, "Topic search failed"),
            }
        }

        if minute % self.config.mention_every_min.max(1) == 0 {
            match self.check_mentions(now).await {
                Ok(n) => debug!(enqueued = n, "Mention scan done"),
                Err(e) => warn!(error = %e, "Mention scan failed"),
            }
        }

        self.process_queue().await
    }

    /// Dequeues until one item is handled or the retry budget is spent.
    pub async fn process_queue(&self) -> Result<QueueRun, WorkerError> {
        let mut run = QueueRun::default();

        while run.attempts < self.config.retry_budget {
            let Some(item) = self.deps.queue.dequeue().await? else {
                debug!(queue = %self.deps.queue.name(), "Queue empty");
                break;
            };
            run.attempts += 1;

            match self.process_item(&item).await {
                Ok(outcome) => {
                    self.stats.record_outcome(&outcome);
                    run.outcome = Some(outcome);
                    break;
                }
                Err(e) if e.is_storage() => {
                    error!(
                        item_id = %item.id,
                        post_id = %item.payload,
                        error = %e,
                        "Storage failure, item left claimed"
                    );
                    return Err(e);
                }
                Err(e) if e.is_transient() => {
                    self.stats.transient_failures.fetch_add(1, Ordering::SeqCst);
                    warn!(
                        item_id = %item.id,
                        post_id = %item.payload,
                        attempt = run.attempts,
                        error = %e,
                        "Transient failure, requeueing"
                    );
                    self.deps.queue.enqueue(&item.payload).await?;
                    run.requeued += 1;
                }
                Err(e) => {
                    self.stats.permanent_failures.fetch_add(1, Ordering::SeqCst);
                    warn!(
                        item_id = %item.id,
                        post_id = %item.payload,
                        error = %e,
                        "Permanent failure, recording"
                    );
                    self.deps
                        .ledger
                        .record_error(item.payload.trim(), &e.to_string())
                        .await?;
                    run.failed += 1;
                    break;
                }
            }
        }

        Ok(run)
    }

    /// Handles one claimed item end to end.
    pub async fn process_item(&self, item: &QueueItem) -> Result<ItemOutcome, WorkerError> {
        let post_id = item.payload.trim();
        let trace_id = Uuid::new_v4();
        info!(
            trace_id = %trace_id,
            item_id = %item.id,
            post_id = %post_id,
            waited_ms = item.wait_time().map(|d| d.num_milliseconds()).unwrap_or(0),
            "Processing post"
        );

        if self.config.toggles.skip_answered {
            if let Some(entry) = self.deps.ledger.read(post_id).await? {
                if entry.is_error() {
                    info!(
                        trace_id = %trace_id,
                        post_id = %post_id,
                        "Post has a recorded failure, skipping until cleared"
                    );
                    return Ok(ItemOutcome::PreviouslyFailed);
                }
                info!(trace_id = %trace_id, post_id = %post_id, "Post already answered, skipping");
                return Ok(ItemOutcome::AlreadyAnswered);
            }
        }

        let seed = self
            .deps
            .posts
            .read(post_id, None)
            .await?
            .ok_or_else(|| FetchError::PostNotFound(post_id.to_string()))?;

        let threads = self.deps.threads.read(&seed, None).await?;
        let participants = threads.branch_participants();
        let history = self
            .deps
            .ledger
            .find_by_participants(&participants, Some(self.config.history_limit))
            .await?;
        debug!(
            trace_id = %trace_id,
            post_id = %post_id,
            branch = threads.reply_branch_thread.len(),
            root_thread = threads.conversation_root_thread.len(),
            history = history.len(),
            "Context assembled"
        );

        let outcome = self
            .deps
            .generator
            .generate_reply(ReplyRequest {
                trace_id,
                bot: self.bot.clone(),
                seed: seed.clone(),
                threads: threads.clone(),
                history,
            })
            .await?;

        let Some(posted) = outcome.posted else {
            return Ok(ItemOutcome::Declined);
        };
        if posted.dry_run {
            info!(trace_id = %trace_id, post_id = %post_id, text = %posted.text, "Dry run reply");
            return Ok(ItemOutcome::DryRun);
        }

        if self.config.toggles.store_enabled {
            let bot_post = PostWithContext::new(Post::new(
                posted.id.clone(),
                self.bot.handle.clone(),
                posted.text.clone(),
                seed.conversation_id(),
            ))
            .replying_to(seed.post.clone());

            let entry = LedgerEntry::success(
                post_id,
                ResponsePost {
                    id: posted.id.clone(),
                    text: posted.text.clone(),
                },
                participants,
                threads,
                Some(bot_post),
            );
            self.deps.ledger.store(&entry).await?;
        }

        info!(trace_id = %trace_id, post_id = %post_id, response_id = %posted.id, "Replied");
        Ok(ItemOutcome::Replied {
            response_id: posted.id,
        })
    }

    /// Enqueues new mentions of the bot since the previous scan.
    pub async fn check_mentions(&self, now: DateTime<Utc>) -> Result<usize, WorkerError> {
        let mut last_scan = self.last_mention_scan.lock().await;
        let mentions = self
            .deps
            .platform
            .fetch_mentions(&self.bot.id, *last_scan)
            .await?;

        let ids: Vec<String> = mentions
            .iter()
            .filter(|m| !m.post.is_authored_by(&self.bot.handle))
            .map(|m| m.id().to_string())
            .collect();
        let enqueued = self.enqueue_new(&ids).await?;
        *last_scan = Some(now);

        info!(mentions = mentions.len(), enqueued, "Mentions checked");
        Ok(enqueued)
    }

    /// Searches followed handles and enqueues the posts the filter picks.
    pub async fn search_for_posts(&self) -> Result<usize, WorkerError> {
        let Some(filter) = &self.deps.filter else {
            return Ok(0);
        };
        let Some(from) = self.follow.search_query() else {
            return Ok(0);
        };

        let query = format!("({from}) -is:retweet -is:reply");
        let candidates = self
            .deps
            .platform
            .search_posts(&query, TOPIC_SEARCH_LIMIT)
            .await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        let selections = filter.select(candidates).await?;
        for selection in &selections {
            info!(
                post_id = %selection.post.id(),
                author = %selection.post.author(),
                reason = %selection.reason,
                "Post selected by topic search"
            );
        }

        let ids: Vec<String> = selections
            .iter()
            .map(|s| s.post.id().to_string())
            .collect();
        self.enqueue_new(&ids).await
    }

    /// Enqueues ids that are neither answered nor already pending.
    async fn enqueue_new(&self, ids: &[String]) -> Result<usize, WorkerError> {
        let mut enqueued = 0;
        for id in ids {
            if self.deps.ledger.read(id).await?.is_some() {
                debug!(post_id = %id, "Already in ledger");
                continue;
            }
            if self.deps.queue.is_pending(id).await? {
                debug!(post_id = %id, "Already queued");
                continue;
            }
            self.deps.queue.enqueue(id).await?;
            enqueued += 1;
        }
        self.stats
            .enqueued_by_scans
            .fetch_add(enqueued as u64, Ordering::SeqCst);
        Ok(enqueued)
    }
}
