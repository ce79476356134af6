//! Chat completions client for LiteLLM and other OpenAI-compatible gateways.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::LlmError;

/// Model used when neither the request nor the environment names one.
pub const DEFAULT_MODEL: &str = "anthropic/claude-opus-4.5";

/// Upper bound on a single completion call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A completion request.
///
/// An empty `model` falls back to the client's default model.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Ask the gateway for a JSON object instead of free text.
    pub json_output: bool,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            json_output: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }
}

/// A completion result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl GenerationResponse {
    /// Text of the first choice, if any.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    /// Why generation stopped ("stop", "length", ...).
    pub finish_reason: String,
}

/// Token accounting reported by the gateway; zero when it reports none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Anything that can complete a chat.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// HTTP client for a LiteLLM-compatible gateway.
pub struct LiteLlmClient {
    api_base: String,
    api_key: Option<String>,
    default_model: String,
    timeout: Duration,
    http_client: Client,
}

fn build_http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

impl LiteLlmClient {
    /// Creates a client for the gateway at `api_base` (e.g. "http://localhost:4000").
    pub fn new(api_base: String, api_key: Option<String>, default_model: String) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            default_model,
            timeout: DEFAULT_TIMEOUT,
            http_client: build_http_client(DEFAULT_TIMEOUT),
        }
    }

    /// Replaces the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.http_client = build_http_client(timeout);
        self
    }

    /// Creates a client from environment variables.
    ///
    /// - `LITELLM_API_BASE`: gateway URL (required)
    /// - `LITELLM_API_KEY`: bearer key (optional)
    /// - `LITELLM_DEFAULT_MODEL`: default model (defaults to [`DEFAULT_MODEL`])
    /// - `LITELLM_TIMEOUT_SECS`: request timeout (defaults to 120)
    ///
    /// # Errors
    ///
    /// Returns `LlmError::MissingApiBase` if `LITELLM_API_BASE` is not set.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_base = env::var("LITELLM_API_BASE").map_err(|_| LlmError::MissingApiBase)?;
        let api_key = env::var("LITELLM_API_KEY").ok().filter(|k| !k.is_empty());
        let default_model =
            env::var("LITELLM_DEFAULT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let mut client = Self::new(api_base, api_key, default_model);
        if let Some(secs) = env::var("LITELLM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            client = client.with_timeout(Duration::from_secs(secs));
        }
        Ok(client)
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn wire_request(&self, request: GenerationRequest) -> WireRequest {
        WireRequest {
            model: if request.model.is_empty() {
                self.default_model.clone()
            } else {
                request.model
            },
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_output.then_some(ResponseFormat {
                kind: "json_object",
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    index: u32,
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    message: String,
}

impl From<WireResponse> for GenerationResponse {
    fn from(wire: WireResponse) -> Self {
        GenerationResponse {
            id: wire.id,
            model: wire.model,
            choices: wire
                .choices
                .into_iter()
                .map(|choice| Choice {
                    index: choice.index,
                    message: Message::assistant(choice.message.content.unwrap_or_default()),
                    finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
                })
                .collect(),
            usage: wire.usage.unwrap_or_default(),
        }
    }
}

/// Maps a non-success response onto [`LlmError`].
fn classify_error(status_code: u16, body: String) -> LlmError {
    let message = serde_json::from_str::<WireError>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);

    match status_code {
        429 => LlmError::RateLimited(message),
        408 | 504 => LlmError::Timeout(message),
        code => LlmError::ApiError { code, message },
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout(e.to_string())
        } else {
            LlmError::RequestFailed(e.to_string())
        }
    }
}

#[async_trait]
impl LlmProvider for LiteLlmClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let wire = self.wire_request(request);
        let url = format!("{}/chat/completions", self.api_base);

        let mut http_request = self
            .http_client
            .post(&url)
            .header("X-Title", "reply-forge")
            .json(&wire);
        if let Some(ref api_key) = self.api_key {
            http_request = http_request.bearer_auth(api_key);
        }

        let http_response = http_request.send().await?;
        let status = http_response.status();
        if !status.is_success() {
            let body = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            tracing::warn!(model = %wire.model, status = status.as_u16(), "LLM request failed");
            return Err(classify_error(status.as_u16(), body));
        }

        let wire_response: WireResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let response = GenerationResponse::from(wire_response);
        tracing::debug!(
            model = %response.model,
            total_tokens = response.usage.total_tokens,
            "LLM generation completed"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> LiteLlmClient {
        LiteLlmClient::new(
            "http://localhost:4000/".to_string(),
            Some("test-key".to_string()),
            "gpt-4".to_string(),
        )
    }

    #[test]
    fn test_message_roles_serialize_lowercase() {
        let json = serde_json::to_string(&Message::system("be brief")).expect("serialize");
        assert_eq!(json, r#"{"role":"system","content":"be brief"}"#);
        assert_eq!(Message::assistant("ok").role, Role::Assistant);
    }

    #[test]
    fn test_wire_request_defaults_model_and_format() {
        let request = GenerationRequest::new("", vec![Message::user("hi")])
            .with_temperature(0.7)
            .with_json_output();
        let json = serde_json::to_value(client().wire_request(request)).expect("serialize");

        assert_eq!(json["model"], "gpt-4");
        assert_eq!(json["temperature"], 0.7);
        assert_eq!(json["response_format"]["type"], "json_object");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_wire_request_keeps_explicit_model() {
        let request = GenerationRequest::new("other", vec![Message::user("hi")]).with_max_tokens(10);
        let json = serde_json::to_value(client().wire_request(request)).expect("serialize");

        assert_eq!(json["model"], "other");
        assert_eq!(json["max_tokens"], 10);
        assert!(json.get("response_format").is_none());
    }

    #[test]
    fn test_response_conversion() {
        let raw = r#"{
            "id": "cmpl-1",
            "model": "gpt-4",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let wire: WireResponse = serde_json::from_str(raw).expect("fixture should parse");
        let response = GenerationResponse::from(wire);

        assert_eq!(response.first_content(), Some("Hello!"));
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[test]
    fn test_response_without_usage_or_content() {
        let raw = r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#;
        let wire: WireResponse = serde_json::from_str(raw).expect("fixture should parse");
        let response = GenerationResponse::from(wire);

        assert_eq!(response.first_content(), Some(""));
        assert_eq!(response.usage, Usage::default());
        assert_eq!(response.choices[0].finish_reason, "stop");
    }

    #[test]
    fn test_classify_error() {
        let err = classify_error(429, r#"{"error": {"message": "slow down"}}"#.to_string());
        assert!(matches!(err, LlmError::RateLimited(ref m) if m == "slow down"));
        assert!(err.is_transient());

        let err = classify_error(504, "upstream timeout".to_string());
        assert!(matches!(err, LlmError::Timeout(_)));

        let err = classify_error(500, "gateway exploded".to_string());
        assert!(matches!(err, LlmError::ApiError { code: 500, ref message } if message == "gateway exploded"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_client_settings() {
        let client = client().with_timeout(Duration::from_secs(5));
        assert_eq!(client.api_base(), "http://localhost:4000");
        assert_eq!(client.default_model(), "gpt-4");
        assert_eq!(client.timeout(), Duration::from_secs(5));
        assert!(client.has_api_key());
    }

    #[tokio::test]
    async fn test_generate_connection_error() {
        let client = LiteLlmClient::new("http://localhost:65535".to_string(), None, "gpt-4".to_string());

        let request = GenerationRequest::new("gpt-4", vec![Message::user("test")]);
        let err = client.generate(request).await.expect_err("no server");
        assert!(matches!(err, LlmError::RequestFailed(_) | LlmError::Timeout(_)));
    }
}
