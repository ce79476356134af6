//! Error types shared across collaborator boundaries.
//!
//! Component-local errors (queue, cache, ledger, storage) live next to their
//! component. The types here cross module boundaries:
//! - Fetches through the `Repository` capability and the social platform
//! - LLM API interactions
//! - Reply generation

use thiserror::Error;

/// Errors returned by repositories and the social platform collaborator.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Post '{0}' not found")]
    PostNotFound(String),

    #[error("Root post of conversation '{0}' could not be fetched")]
    ConversationRootMissing(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to parse platform response: {0}")]
    ParseError(String),

    #[error("Cache storage error: {0}")]
    Storage(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FetchError {
    /// Rate limits and timeouts are worth retrying later; nothing else is.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::RateLimited(_) | FetchError::Timeout(_))
    }

    /// Whether the failure came from local storage rather than the collaborator.
    pub fn is_storage(&self) -> bool {
        matches!(self, FetchError::Storage(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else {
            FetchError::RequestFailed(e.to_string())
        }
    }
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("LLM request timed out: {0}")]
    Timeout(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

impl LlmError {
    /// Rate limits and timeouts clear up on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::RateLimited(_) | LlmError::Timeout(_))
    }
}

/// Errors surfaced by the generation collaborator.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Platform error: {0}")]
    Platform(#[from] FetchError),

    #[error("Prompt rendering failed: {0}")]
    Template(#[from] tera::Error),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),
}

impl GenerationError {
    /// Whether the generation should be attempted again later.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Llm(e) => e.is_transient(),
            GenerationError::Platform(e) => e.is_transient(),
            _ => false,
        }
    }
}
