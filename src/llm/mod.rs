//! LLM access for the reply and post-selection agents.
//!
//! ```ignore
//! use reply_forge::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = GenerationRequest::new("", vec![Message::user("Hello")]);
//! let response = client.generate(request).await?;
//! ```

pub mod litellm;

pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Role,
    Usage, DEFAULT_MODEL, DEFAULT_TIMEOUT,
};
