//! Reference [`ReplyGenerator`] backed by an LLM and the social platform.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::prompts::{ReplyPrompt, ReplyPromptVars};
use super::{PostedReply, ReplyGenerator, ReplyOutcome, ReplyRequest};
use crate::error::GenerationError;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::social::{
    format_post, format_posts, strip_leading_mentions, RenderOptions, SocialPlatform,
};
use crate::utils::{parse_json, JsonExtractionError};

/// Platform limit for a single post.
pub const MAX_REPLY_CHARS: usize = 280;

/// Number of earlier conversations shown to the model.
const DEFAULT_HISTORY_IN_PROMPT: usize = 4;

/// Configuration for [`ReplyAgent`].
#[derive(Debug, Clone)]
pub struct ReplyAgentConfig {
    /// Model name; empty uses the provider default.
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// When false the reply is generated but never posted.
    pub post_enabled: bool,
    pub history_in_prompt: usize,
}

impl Default for ReplyAgentConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.7,
            max_tokens: 3000,
            post_enabled: true,
            history_in_prompt: DEFAULT_HISTORY_IN_PROMPT,
        }
    }
}

impl ReplyAgentConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_post_enabled(mut self, enabled: bool) -> Self {
        self.post_enabled = enabled;
        self
    }

    pub fn with_history_in_prompt(mut self, limit: usize) -> Self {
        self.history_in_prompt = limit;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ModelReply {
    #[serde(default)]
    reply: String,
    #[serde(default)]
    skip: bool,
}

/// Generates a reply with an LLM and posts it.
pub struct ReplyAgent {
    llm: Arc<dyn LlmProvider>,
    platform: Arc<dyn SocialPlatform>,
    config: ReplyAgentConfig,
}

impl ReplyAgent {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        platform: Arc<dyn SocialPlatform>,
        config: ReplyAgentConfig,
    ) -> Self {
        Self {
            llm,
            platform,
            config,
        }
    }

    pub fn config(&self) -> &ReplyAgentConfig {
        &self.config
    }

    /// Renders the prompt for a request.
    pub fn build_prompt(&self, request: &ReplyRequest) -> Result<ReplyPrompt, GenerationError> {
        let thread = RenderOptions::in_thread();

        let previous_interactions = if request.history.is_empty() {
            "None".to_string()
        } else {
            request
                .history
                .iter()
                .take(self.config.history_in_prompt)
                .map(|entry| {
                    format!(
                        "<conversation>{}</conversation>",
                        format_posts(&entry.reply_branch_thread, thread)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let vars = ReplyPromptVars {
            bot_handle: &request.bot.handle,
            user_post: format_post(&request.seed, thread),
            previous_interactions,
            conversation_root_thread: format_posts(&request.threads.conversation_root_thread, thread),
            reply_branch_thread: format_posts(&request.threads.reply_branch_thread, thread),
        };

        Ok(ReplyPrompt::render(&vars)?)
    }

    /// Reads the model's answer, accepting plain text when it ignored the
    /// JSON format. Returns `None` when the model chose to stay silent.
    fn parse_reply(content: &str) -> Result<Option<String>, GenerationError> {
        let parsed = match parse_json::<ModelReply>(content) {
            Ok(reply) => reply,
            Err(JsonExtractionError::NotFound { .. }) => ModelReply {
                reply: content.to_string(),
                skip: false,
            },
            Err(e) => return Err(GenerationError::MalformedOutput(e.to_string())),
        };

        if parsed.skip {
            return Ok(None);
        }

        let text = truncate_to_limit(&strip_leading_mentions(&parsed.reply), MAX_REPLY_CHARS);
        if text.is_empty() {
            return Err(GenerationError::MalformedOutput(
                "model returned an empty reply".to_string(),
            ));
        }
        Ok(Some(text))
    }
}

/// Cuts `text` to at most `limit` characters, at a word boundary when one
/// exists.
fn truncate_to_limit(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit).collect();
    match cut.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => cut[..idx].trim_end().to_string(),
        _ => cut,
    }
}

#[async_trait]
impl ReplyGenerator for ReplyAgent {
    async fn generate_reply(&self, request: ReplyRequest) -> Result<ReplyOutcome, GenerationError> {
        let prompt = self.build_prompt(&request)?;

        let llm_request = GenerationRequest::new(
            self.config.model.clone(),
            vec![Message::system(prompt.system), Message::user(prompt.user)],
        )
        .with_json_output()
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        let response = self.llm.generate(llm_request).await?;
        let content = response.first_content().ok_or_else(|| {
            GenerationError::MalformedOutput("response contained no choices".to_string())
        })?;

        let Some(text) = Self::parse_reply(content)? else {
            tracing::info!(
                trace_id = %request.trace_id,
                post_id = %request.seed.id(),
                "Model chose not to reply"
            );
            return Ok(ReplyOutcome {
                text: String::new(),
                posted: None,
            });
        };

        if !self.config.post_enabled {
            tracing::info!(
                trace_id = %request.trace_id,
                post_id = %request.seed.id(),
                chars = text.chars().count(),
                "Posting disabled, reply not sent"
            );
            return Ok(ReplyOutcome {
                posted: Some(PostedReply {
                    id: format!("dry-run-{}", request.trace_id),
                    text: text.clone(),
                    dry_run: true,
                }),
                text,
            });
        }

        let post = self.platform.post_reply(&text, request.seed.id()).await?;
        tracing::info!(
            trace_id = %request.trace_id,
            post_id = %request.seed.id(),
            reply_id = %post.id,
            "Reply posted"
        );

        Ok(ReplyOutcome {
            text,
            posted: Some(PostedReply {
                id: post.id,
                text: post.text,
                dry_run: false,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    use crate::conversation::ThreadResult;
    use crate::error::{FetchError, LlmError};
    use crate::ledger::{LedgerEntry, ResponsePost};
    use crate::llm::{Choice, GenerationResponse, Usage};
    use crate::social::{Post, PostWithContext, User};

    struct ScriptedLlm {
        reply: Result<String, ()>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedLlm {
        fn answering(content: &str) -> Self {
            Self {
                reply: Ok(content.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn rate_limited() -> Self {
            Self {
                reply: Err(()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            let content = self
                .reply
                .clone()
                .map_err(|_| LlmError::RateLimited("429".to_string()))?;
            Ok(GenerationResponse {
                id: "gen-1".to_string(),
                model: "test".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(content),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
            })
        }
    }

    #[derive(Default)]
    struct PostingPlatform {
        posted: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SocialPlatform for PostingPlatform {
        async fn fetch_post(&self, _id: &str) -> Result<Option<PostWithContext>, FetchError> {
            Ok(None)
        }

        async fn search_posts(
            &self,
            _query: &str,
            _max_results: usize,
        ) -> Result<Vec<PostWithContext>, FetchError> {
            Ok(Vec::new())
        }

        async fn fetch_user(&self, _handle: &str) -> Result<Option<User>, FetchError> {
            Ok(None)
        }

        async fn fetch_mentions(
            &self,
            _user_id: &str,
            _since: Option<DateTime<Utc>>,
        ) -> Result<Vec<PostWithContext>, FetchError> {
            Ok(Vec::new())
        }

        async fn post_reply(&self, text: &str, in_reply_to: &str) -> Result<Post, FetchError> {
            self.posted
                .lock()
                .unwrap()
                .push((text.to_string(), in_reply_to.to_string()));
            Ok(Post::new("reply-1", "forge", text, "R"))
        }
    }

    fn request() -> ReplyRequest {
        let root = Post::new("R", "alice", "gm everyone", "R");
        let seed = PostWithContext::new(Post::new("S", "bob", "@forge what do you think?", "R"))
            .replying_to(root.clone());
        let earlier = LedgerEntry::success(
            "OLD",
            ResponsePost {
                id: "r0".to_string(),
                text: "hello again".to_string(),
            },
            vec!["bob".to_string()],
            ThreadResult {
                reply_branch_thread: vec![PostWithContext::new(Post::new(
                    "OLD", "bob", "first chat", "OLD",
                ))],
                conversation_root_thread: Vec::new(),
            },
            None,
        );

        ReplyRequest {
            trace_id: Uuid::new_v4(),
            bot: User::new("42", "forge"),
            threads: ThreadResult {
                reply_branch_thread: vec![PostWithContext::new(root.clone()), seed.clone()],
                conversation_root_thread: vec![PostWithContext::new(root)],
            },
            seed,
            history: vec![earlier],
        }
    }

    fn agent(
        llm: Arc<ScriptedLlm>,
        platform: Arc<PostingPlatform>,
        post_enabled: bool,
    ) -> ReplyAgent {
        ReplyAgent::new(
            llm,
            platform,
            ReplyAgentConfig::default().with_post_enabled(post_enabled),
        )
    }

    #[tokio::test]
    async fn test_posts_reply_without_leading_mentions() {
        let llm = Arc::new(ScriptedLlm::answering(
            r#"{"reply": "@bob @alice Looks good to me.", "skip": false}"#,
        ));
        let platform = Arc::new(PostingPlatform::default());
        let agent = agent(llm.clone(), platform.clone(), true);

        let outcome = agent.generate_reply(request()).await.expect("reply");
        assert_eq!(outcome.text, "Looks good to me.");
        assert!(outcome.is_published());
        assert_eq!(outcome.posted.as_ref().map(|p| p.id.as_str()), Some("reply-1"));

        let posted = platform.posted.lock().unwrap();
        assert_eq!(
            posted.as_slice(),
            &[("Looks good to me.".to_string(), "S".to_string())]
        );

        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests[0].temperature, Some(0.7));
        assert_eq!(requests[0].max_tokens, Some(3000));
        let user_prompt = &requests[0].messages[1].content;
        assert!(user_prompt.contains("<conversation><post>"));
        assert!(user_prompt.contains("first chat"));
    }

    #[tokio::test]
    async fn test_dry_run_when_posting_disabled() {
        let llm = Arc::new(ScriptedLlm::answering("Plain text answer"));
        let platform = Arc::new(PostingPlatform::default());
        let agent = agent(llm, platform.clone(), false);

        let outcome = agent.generate_reply(request()).await.expect("reply");
        let posted = outcome.posted.expect("dry-run post");
        assert!(posted.dry_run);
        assert_eq!(posted.text, "Plain text answer");
        assert!(platform.posted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skip_yields_no_post() {
        let llm = Arc::new(ScriptedLlm::answering(r#"{"reply": "", "skip": true}"#));
        let platform = Arc::new(PostingPlatform::default());
        let agent = agent(llm, platform.clone(), true);

        let outcome = agent.generate_reply(request()).await.expect("reply");
        assert!(outcome.posted.is_none());
        assert!(platform.posted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mention_only_reply_is_malformed() {
        let llm = Arc::new(ScriptedLlm::answering(r#"{"reply": "@bob"}"#));
        let agent = agent(llm, Arc::new(PostingPlatform::default()), true);

        let err = agent.generate_reply(request()).await.expect_err("empty");
        assert!(matches!(err, GenerationError::MalformedOutput(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let agent = agent(
            Arc::new(ScriptedLlm::rate_limited()),
            Arc::new(PostingPlatform::default()),
            true,
        );
        let err = agent.generate_reply(request()).await.expect_err("429");
        assert!(err.is_transient());
    }

    #[test]
    fn test_prompt_without_history_says_none() {
        let agent = agent(
            Arc::new(ScriptedLlm::answering("x")),
            Arc::new(PostingPlatform::default()),
            true,
        );
        let mut req = request();
        req.history.clear();
        let prompt = agent.build_prompt(&req).expect("prompt");
        assert!(prompt.user.contains("<previous_interactions>\nNone\n"));
    }

    #[test]
    fn test_truncate_to_limit() {
        assert_eq!(truncate_to_limit("short", 280), "short");
        let long = "word ".repeat(100);
        let cut = truncate_to_limit(&long, 12);
        assert_eq!(cut, "word word");
        assert_eq!(truncate_to_limit("abcdefghij", 4), "abcd");
    }
}
