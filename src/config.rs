//! Runtime configuration.
//!
//! [`BotConfig`] is read from `REPLY_FORGE_*` environment variables (plus the
//! platform credentials) and can be adjusted with `with_*` builders before
//! being handed to the components. Switches that used to be process-wide
//! globals live in [`FeatureToggles`] and are passed down explicitly.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::social::x_api::DEFAULT_API_BASE;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading a configuration file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Follow list is not valid YAML.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Behavior switches threaded through constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureToggles {
    /// Memoize platform lookups in the cache table.
    pub cache_enabled: bool,
    /// Publish replies; when off, replies are generated as dry runs.
    pub post_enabled: bool,
    /// Write successful replies to the ledger.
    pub store_enabled: bool,
    /// Skip posts that already have a ledger entry.
    pub skip_answered: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            post_enabled: true,
            store_enabled: true,
            skip_answered: true,
        }
    }
}

/// Configuration for the bot process.
#[derive(Debug, Clone)]
pub struct BotConfig {
    // Storage
    pub database_path: PathBuf,
    pub queue_name: String,
    /// Use a Redis queue instead of the SQLite one.
    pub redis_url: Option<String>,

    // Worker
    pub bot_handle: Option<String>,
    pub tick_interval: Duration,
    /// Attempts per tick spent on transient failures.
    pub retry_budget: u32,
    pub mention_every_min: u32,
    pub search_every_min: u32,
    /// Previous interactions loaded for a reply.
    pub history_limit: usize,
    /// YAML file with the handles searched for topic posts.
    pub follow_file: Option<PathBuf>,

    // Ingress
    pub bind_addr: String,

    // Platform
    pub x_api_base: String,
    pub x_bearer_token: Option<String>,
    pub x_user_token: Option<String>,

    pub toggles: FeatureToggles,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("reply_forge.db"),
            queue_name: "replyQueue".to_string(),
            redis_url: None,

            bot_handle: None,
            tick_interval: Duration::from_secs(60),
            retry_budget: 2,
            mention_every_min: 4,
            search_every_min: 30,
            history_limit: 4,
            follow_file: None,

            bind_addr: "0.0.0.0:3001".to_string(),

            x_api_base: DEFAULT_API_BASE.to_string(),
            x_bearer_token: None,
            x_user_token: None,

            toggles: FeatureToggles::default(),
        }
    }
}

impl BotConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REPLY_FORGE_DB`: SQLite database path (default: reply_forge.db)
    /// - `REPLY_FORGE_QUEUE`: queue name (default: replyQueue)
    /// - `REPLY_FORGE_REDIS_URL`: use a Redis queue at this URL
    /// - `REPLY_FORGE_BOT_HANDLE`: handle the bot replies as
    /// - `REPLY_FORGE_TICK_SECS`: seconds between ticks (default: 60)
    /// - `REPLY_FORGE_RETRY_BUDGET`: attempts per tick (default: 2)
    /// - `REPLY_FORGE_MENTION_EVERY_MIN`: mention scan period (default: 4)
    /// - `REPLY_FORGE_SEARCH_EVERY_MIN`: topic search period (default: 30)
    /// - `REPLY_FORGE_HISTORY_LIMIT`: previous interactions per reply (default: 4)
    /// - `REPLY_FORGE_FOLLOW_FILE`: YAML follow list; topic search is off without it
    /// - `REPLY_FORGE_BIND`: ingress address (default: 0.0.0.0:3001)
    /// - `REPLY_FORGE_CACHE_ENABLED`, `REPLY_FORGE_POST_ENABLED`,
    ///   `REPLY_FORGE_STORE_ENABLED`, `REPLY_FORGE_SKIP_ANSWERED`: toggles (default: true)
    /// - `X_API_BASE`, `X_BEARER_TOKEN`, `X_USER_TOKEN`: platform access
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a value cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`BotConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Storage
        if let Some(val) = lookup("REPLY_FORGE_DB") {
            config.database_path = PathBuf::from(val);
        }
        if let Some(val) = lookup("REPLY_FORGE_QUEUE") {
            config.queue_name = val;
        }
        config.redis_url = non_empty(lookup("REPLY_FORGE_REDIS_URL"));

        // Worker
        config.bot_handle =
            non_empty(lookup("REPLY_FORGE_BOT_HANDLE")).map(|h| h.trim_start_matches('@').to_string());

        if let Some(val) = lookup("REPLY_FORGE_TICK_SECS") {
            let secs: u64 = parse_env_value(&val, "REPLY_FORGE_TICK_SECS")?;
            config.tick_interval = Duration::from_secs(secs);
        }
        if let Some(val) = lookup("REPLY_FORGE_RETRY_BUDGET") {
            config.retry_budget = parse_env_value(&val, "REPLY_FORGE_RETRY_BUDGET")?;
        }
        if let Some(val) = lookup("REPLY_FORGE_MENTION_EVERY_MIN") {
            config.mention_every_min = parse_env_value(&val, "REPLY_FORGE_MENTION_EVERY_MIN")?;
        }
        if let Some(val) = lookup("REPLY_FORGE_SEARCH_EVERY_MIN") {
            config.search_every_min = parse_env_value(&val, "REPLY_FORGE_SEARCH_EVERY_MIN")?;
        }
        if let Some(val) = lookup("REPLY_FORGE_HISTORY_LIMIT") {
            config.history_limit = parse_env_value(&val, "REPLY_FORGE_HISTORY_LIMIT")?;
        }
        config.follow_file = non_empty(lookup("REPLY_FORGE_FOLLOW_FILE")).map(PathBuf::from);

        // Ingress
        if let Some(val) = lookup("REPLY_FORGE_BIND") {
            config.bind_addr = val;
        }

        // Platform
        if let Some(val) = non_empty(lookup("X_API_BASE")) {
            config.x_api_base = val;
        }
        config.x_bearer_token = non_empty(lookup("X_BEARER_TOKEN"));
        config.x_user_token = non_empty(lookup("X_USER_TOKEN"));

        // Toggles
        if let Some(val) = lookup("REPLY_FORGE_CACHE_ENABLED") {
            config.toggles.cache_enabled = parse_env_bool(&val, "REPLY_FORGE_CACHE_ENABLED")?;
        }
        if let Some(val) = lookup("REPLY_FORGE_POST_ENABLED") {
            config.toggles.post_enabled = parse_env_bool(&val, "REPLY_FORGE_POST_ENABLED")?;
        }
        if let Some(val) = lookup("REPLY_FORGE_STORE_ENABLED") {
            config.toggles.store_enabled = parse_env_bool(&val, "REPLY_FORGE_STORE_ENABLED")?;
        }
        if let Some(val) = lookup("REPLY_FORGE_SKIP_ANSWERED") {
            config.toggles.skip_answered = parse_env_bool(&val, "REPLY_FORGE_SKIP_ANSWERED")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_path cannot be empty".to_string(),
            ));
        }

        if self.queue_name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "queue_name cannot be empty".to_string(),
            ));
        }

        if self.tick_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "tick_interval must be greater than 0".to_string(),
            ));
        }

        if self.retry_budget == 0 {
            return Err(ConfigError::ValidationFailed(
                "retry_budget must be at least 1".to_string(),
            ));
        }

        if !(1..=60).contains(&self.mention_every_min) {
            return Err(ConfigError::ValidationFailed(
                "mention_every_min must be between 1 and 60".to_string(),
            ));
        }

        if !(1..=60).contains(&self.search_every_min) {
            return Err(ConfigError::ValidationFailed(
                "search_every_min must be between 1 and 60".to_string(),
            ));
        }

        if self.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::ValidationFailed(format!(
                "bind_addr '{}' is not a socket address",
                self.bind_addr
            )));
        }

        if self.x_api_base.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "x_api_base cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// The bot handle, required by the worker.
    pub fn require_bot_handle(&self) -> Result<&str, ConfigError> {
        self.bot_handle
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("REPLY_FORGE_BOT_HANDLE".to_string()))
    }

    /// The app bearer token, required for any platform read.
    pub fn require_bearer_token(&self) -> Result<&str, ConfigError> {
        self.x_bearer_token
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("X_BEARER_TOKEN".to_string()))
    }

    /// Database path as a string for the SQLite connection.
    pub fn database_path_str(&self) -> Result<&str, ConfigError> {
        self.database_path
            .to_str()
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "REPLY_FORGE_DB".to_string(),
                message: "path is not valid UTF-8".to_string(),
            })
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    pub fn with_redis_url(mut self, url: Option<String>) -> Self {
        self.redis_url = url;
        self
    }

    pub fn with_bot_handle(mut self, handle: impl Into<String>) -> Self {
        self.bot_handle = Some(handle.into());
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_follow_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.follow_file = Some(path.into());
        self
    }

    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn with_toggles(mut self, toggles: FeatureToggles) -> Self {
        self.toggles = toggles;
        self
    }
}

/// Handles whose posts are searched for topic replies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowList {
    #[serde(default)]
    pub handles: Vec<String>,
}

impl FollowList {
    /// Loads a follow list from a YAML file with a `handles:` list.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let list: FollowList = serde_yaml::from_str(raw)?;
        Ok(list.normalized())
    }

    /// Trims handles, strips `@` and drops blanks and case-insensitive repeats.
    pub fn normalized(self) -> Self {
        let mut seen = HashSet::new();
        let handles = self
            .handles
            .into_iter()
            .map(|h| h.trim().trim_start_matches('@').to_string())
            .filter(|h| !h.is_empty() && seen.insert(h.to_lowercase()))
            .collect();
        Self { handles }
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// `from:a OR from:b ...`, or `None` for an empty list.
    pub fn search_query(&self) -> Option<String> {
        if self.handles.is_empty() {
            return None;
        }
        Some(
            self.handles
                .iter()
                .map(|h| format!("from:{h}"))
                .collect::<Vec<_>>()
                .join(" OR "),
        )
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
