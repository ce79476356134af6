//! Command definitions for the reply-forge CLI.
//!
//! `run` is the long-lived process: worker loop plus HTTP ingress. The
//! remaining subcommands operate on the queue, ledger and cache directly.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use super::runtime::{
    build_platform, cached_posts, requeue_post, resolve_bot, thread_finder, Storage,
};
use crate::agents::{PostFinder, PostFinderConfig, ReplyAgent, ReplyAgentConfig};
use crate::config::{BotConfig, FollowList};
use crate::llm::LiteLlmClient;
use crate::repository::Repository;
use crate::scheduler::{ReplyWorker, WorkerConfig, WorkerDeps};
use crate::server::{self, AppState};
use crate::social::{format_posts, RenderOptions};

/// Default number of entries shown by `ledger`.
const DEFAULT_LEDGER_LIMIT: usize = 10;

/// Queue-driven reply bot for X conversations.
#[derive(Parser)]
#[command(name = "reply-forge")]
#[command(about = "Reply to queued X posts with LLM-generated answers")]
#[command(version)]
#[command(
    long_about = "reply-forge pulls post ids from a durable queue, reconstructs the conversation around each post, generates a reply with an LLM and records the result in a ledger.\n\nExample usage:\n  reply-forge run --bot-handle mybot\n  reply-forge enqueue 1850000000000000000"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// SQLite database path (overrides REPLY_FORGE_DB).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Queue name (overrides REPLY_FORGE_QUEUE).
    #[arg(long, global = true)]
    pub queue: Option<String>,

    /// Redis URL (overrides REPLY_FORGE_REDIS_URL); the queue lives in Redis when set.
    #[arg(long, global = true)]
    pub redis_url: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run the worker loop and the HTTP ingress.
    Run(RunArgs),

    /// Run only the HTTP ingress.
    Serve(ServeArgs),

    /// Add a post id to the queue.
    #[command(alias = "add")]
    Enqueue {
        /// Post id to answer.
        post_id: String,
    },

    /// Show the number of unclaimed queue items.
    Status,

    /// Show the next item without claiming it.
    Peek,

    /// Reconstruct and print the conversation around a post.
    Thread {
        /// Post id to start from.
        post_id: String,

        /// Print the threads as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show ledger entries.
    Ledger {
        /// Source post id; shows the latest entries when omitted.
        post_id: Option<String>,

        /// Maximum number of entries when listing.
        #[arg(long, default_value_t = DEFAULT_LEDGER_LIMIT)]
        limit: usize,
    },

    /// Clear a recorded failure and queue the post again.
    Retry {
        /// Source post id.
        post_id: String,
    },

    /// Drop the cached lookup of a post.
    Invalidate {
        /// Post id.
        post_id: String,
    },
}

/// Arguments for the `run` command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Handle of the bot account (overrides REPLY_FORGE_BOT_HANDLE).
    #[arg(long)]
    pub bot_handle: Option<String>,

    /// Ingress address (overrides REPLY_FORGE_BIND).
    #[arg(long)]
    pub bind: Option<String>,

    /// Do not start the HTTP ingress.
    #[arg(long)]
    pub no_ingress: bool,

    /// Generate replies without posting them.
    #[arg(long)]
    pub dry_run: bool,

    /// YAML follow list for topic search (overrides REPLY_FORGE_FOLLOW_FILE).
    #[arg(long)]
    pub follow_file: Option<PathBuf>,
}

/// Arguments for the `serve` command.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Ingress address (overrides REPLY_FORGE_BIND).
    #[arg(long)]
    pub bind: Option<String>,
}

/// Parse CLI arguments and return the Cli struct.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse arguments and execute the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Commands::Run(args) => run_bot(config, args).await,
        Commands::Serve(args) => run_serve(config, args).await,
        Commands::Enqueue { post_id } => run_enqueue(&config, &post_id).await,
        Commands::Status => run_status(&config).await,
        Commands::Peek => run_peek(&config).await,
        Commands::Thread { post_id, json } => run_thread(&config, &post_id, json).await,
        Commands::Ledger { post_id, limit } => {
            run_ledger(&config, post_id.as_deref(), limit).await
        }
        Commands::Retry { post_id } => run_retry(&config, &post_id).await,
        Commands::Invalidate { post_id } => run_invalidate(&config, &post_id).await,
    }
}

/// Environment configuration with the global flags applied on top.
fn load_config(cli: &Cli) -> anyhow::Result<BotConfig> {
    let mut config = BotConfig::from_env().context("invalid environment configuration")?;
    if let Some(db) = &cli.db {
        config = config.with_database_path(db.clone());
    }
    if let Some(queue) = &cli.queue {
        config = config.with_queue_name(queue.clone());
    }
    if cli.redis_url.is_some() {
        config = config.with_redis_url(cli.redis_url.clone());
    }
    config.validate()?;
    Ok(config)
}

async fn run_bot(mut config: BotConfig, args: RunArgs) -> anyhow::Result<()> {
    if let Some(handle) = args.bot_handle {
        config = config.with_bot_handle(handle);
    }
    if let Some(bind) = args.bind {
        config = config.with_bind_addr(bind);
    }
    if let Some(path) = args.follow_file {
        config = config.with_follow_file(path);
    }
    if args.dry_run {
        config.toggles.post_enabled = false;
    }

    let handle = config.require_bot_handle()?.to_string();
    let storage = Storage::open(&config).await?;
    let platform = build_platform(&config)?;
    let cache_enabled = config.toggles.cache_enabled;

    let bot = resolve_bot(&handle, platform.clone(), storage.cache.clone(), cache_enabled).await?;
    info!(bot = %bot.handle, bot_id = %bot.id, "Resolved bot account");

    let posts = Arc::new(cached_posts(platform.clone(), storage.cache.clone(), cache_enabled));
    let threads = thread_finder(posts.clone(), platform.clone(), storage.cache.clone(), cache_enabled);

    let llm = Arc::new(LiteLlmClient::from_env()?);
    let model = llm.default_model().to_string();
    let post_enabled = config.toggles.post_enabled && platform.can_post();
    let agent = ReplyAgent::new(
        llm.clone(),
        platform.clone(),
        ReplyAgentConfig::default()
            .with_model(model.clone())
            .with_post_enabled(post_enabled)
            .with_history_in_prompt(config.history_limit),
    );
    let finder = PostFinder::new(llm, PostFinderConfig::default().with_model(model));

    let follow = match &config.follow_file {
        Some(path) => FollowList::from_yaml_file(path)
            .with_context(|| format!("failed to read follow list {}", path.display()))?
            .normalized(),
        None => FollowList::default(),
    };
    if follow.is_empty() {
        info!("No follow list configured; topic search is off");
    }

    let deps = WorkerDeps {
        queue: storage.queue.clone(),
        ledger: storage.ledger.clone(),
        posts,
        threads: Arc::new(threads),
        platform,
        generator: Arc::new(agent),
        filter: Some(Arc::new(finder)),
    };
    let worker = Arc::new(
        ReplyWorker::new(deps, bot, WorkerConfig::from_bot_config(&config)).with_follow_list(follow),
    );

    let worker_task = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    let server_task = if args.no_ingress {
        None
    } else {
        let addr = config.bind_addr.clone();
        let state = AppState::new(storage.queue.clone());
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.changed().await;
            };
            server::serve(&addr, state, shutdown).await
        }))
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Shutting down");

    worker.stop();
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_task.await {
        warn!(error = %e, "Worker task ended abnormally");
    }
    if let Some(task) = server_task {
        task.await.context("ingress task panicked")??;
    }

    let stats = worker.stats();
    info!(
        ticks = stats.ticks,
        replied = stats.replied,
        dry_runs = stats.dry_runs,
        permanent_failures = stats.permanent_failures,
        "Final worker stats"
    );
    storage.db.close().await;
    Ok(())
}

async fn run_serve(mut config: BotConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config = config.with_bind_addr(bind);
    }
    let storage = Storage::open(&config).await?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
        }
    };
    server::serve(&config.bind_addr, AppState::new(storage.queue.clone()), shutdown).await?;
    storage.db.close().await;
    Ok(())
}

async fn run_enqueue(config: &BotConfig, post_id: &str) -> anyhow::Result<()> {
    let storage = Storage::open(config).await?;
    let item_id = storage.queue.enqueue(post_id.trim()).await?;
    println!("Queued {} as item {}", post_id.trim(), item_id);
    Ok(())
}

async fn run_status(config: &BotConfig) -> anyhow::Result<()> {
    let storage = Storage::open(config).await?;
    let count = storage.queue.count().await?;
    println!("{}: {} unclaimed", storage.queue.name(), count);
    Ok(())
}

async fn run_peek(config: &BotConfig) -> anyhow::Result<()> {
    let storage = Storage::open(config).await?;
    match storage.queue.peek().await? {
        Some(item) => println!(
            "Next: post {} (item {}, queued {})",
            item.payload,
            item.id,
            item.enqueued_at.to_rfc3339()
        ),
        None => println!("Queue is empty"),
    }
    Ok(())
}

async fn run_thread(config: &BotConfig, post_id: &str, json: bool) -> anyhow::Result<()> {
    let storage = Storage::open(config).await?;
    let platform = build_platform(config)?;
    let enabled = config.toggles.cache_enabled;
    let posts = Arc::new(cached_posts(platform.clone(), storage.cache.clone(), enabled));
    let finder = thread_finder(posts.clone(), platform, storage.cache.clone(), enabled);

    let seed = posts
        .read(post_id.trim(), None)
        .await?
        .with_context(|| format!("post {post_id} not found"))?;
    let threads = finder.read(&seed, None).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&threads)?);
    } else {
        println!("== Conversation root thread ==");
        println!(
            "{}",
            format_posts(&threads.conversation_root_thread, RenderOptions::in_thread())
        );
        println!("== Reply branch ==");
        println!(
            "{}",
            format_posts(&threads.reply_branch_thread, RenderOptions::in_thread())
        );
        println!("Participants: {}", threads.branch_participants().join(", "));
    }
    Ok(())
}

async fn run_ledger(config: &BotConfig, post_id: Option<&str>, limit: usize) -> anyhow::Result<()> {
    let storage = Storage::open(config).await?;
    let entries = match post_id {
        Some(id) => storage.ledger.read(id.trim()).await?.into_iter().collect(),
        None => storage.ledger.latest(limit).await?,
    };
    if entries.is_empty() {
        println!("No ledger entries");
    }
    for entry in entries {
        let status = match (&entry.response, &entry.error) {
            (_, Some(error)) => format!("error: {error}"),
            (Some(response), None) => format!("replied {}: {}", response.id, response.text),
            (None, None) => "pending".to_string(),
        };
        println!(
            "{} [{}] {}",
            entry.source_post_id,
            entry.created_at.to_rfc3339(),
            status
        );
    }
    Ok(())
}

async fn run_retry(config: &BotConfig, post_id: &str) -> anyhow::Result<()> {
    let post_id = post_id.trim();
    let storage = Storage::open(config).await?;
    let requeue = requeue_post(storage.queue.as_ref(), &storage.ledger, &storage.cache, post_id).await?;
    if requeue.cleared_error {
        println!("Cleared recorded failure for {post_id}");
    }
    if requeue.dropped_cached_lookup {
        println!("Dropped cached lookup of {post_id}");
    }
    if requeue.already_replied {
        println!("Note: {post_id} already has a reply; the worker will skip it");
    }
    println!("Queued {post_id} as item {}", requeue.item_id);
    Ok(())
}

async fn run_invalidate(config: &BotConfig, post_id: &str) -> anyhow::Result<()> {
    let storage = Storage::open(config).await?;
    let posts = cached_posts(build_platform(config)?, storage.cache.clone(), true);
    if posts.invalidate(post_id).await? {
        println!("Dropped cached lookup of {}", post_id.trim());
    } else {
        println!("No cached lookup of {}", post_id.trim());
    }
    Ok(())
}
