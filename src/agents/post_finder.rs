//! Reference [`PostFilter`] that asks an LLM which posts to answer.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::prompts::FinderPrompt;
use super::{PostFilter, Selection};
use crate::error::GenerationError;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::social::{format_posts, PostWithContext, RenderOptions};
use crate::utils::parse_json;

/// Configuration for [`PostFinder`].
#[derive(Debug, Clone)]
pub struct PostFinderConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub max_selections: usize,
}

impl Default for PostFinderConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.1,
            max_tokens: 2000,
            max_selections: 3,
        }
    }
}

impl PostFinderConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_selections(mut self, max: usize) -> Self {
        self.max_selections = max;
        self
    }
}

#[derive(Debug, Deserialize)]
struct RawSelection {
    #[serde(alias = "tweet_id", alias = "id")]
    post_id: String,
    #[serde(default)]
    reason: String,
}

/// Models answer either with the documented object or a bare list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSelections {
    Wrapped {
        #[serde(alias = "posts", alias = "tweets")]
        selections: Vec<RawSelection>,
    },
    Bare(Vec<RawSelection>),
}

impl RawSelections {
    fn into_vec(self) -> Vec<RawSelection> {
        match self {
            RawSelections::Wrapped { selections } => selections,
            RawSelections::Bare(list) => list,
        }
    }
}

/// Picks posts worth answering from a list of candidates.
pub struct PostFinder {
    llm: Arc<dyn LlmProvider>,
    config: PostFinderConfig,
}

impl PostFinder {
    pub fn new(llm: Arc<dyn LlmProvider>, config: PostFinderConfig) -> Self {
        Self { llm, config }
    }

    /// Maps the model's picks back onto the candidates.
    ///
    /// Ids that are not among the candidates are dropped, as are repeats.
    fn resolve(
        candidates: &[PostWithContext],
        raw: Vec<RawSelection>,
        max: usize,
    ) -> Vec<Selection> {
        let mut seen = HashSet::new();
        raw.into_iter()
            .filter_map(|pick| {
                let id = pick.post_id.trim().to_string();
                let Some(post) = candidates.iter().find(|p| p.id() == id) else {
                    tracing::warn!(post_id = %id, "Model selected an unknown post id");
                    return None;
                };
                seen.insert(id).then(|| Selection {
                    post: post.clone(),
                    reason: pick.reason,
                })
            })
            .take(max)
            .collect()
    }
}

#[async_trait]
impl PostFilter for PostFinder {
    async fn select(
        &self,
        candidates: Vec<PostWithContext>,
    ) -> Result<Vec<Selection>, GenerationError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = FinderPrompt::render(
            &format_posts(&candidates, RenderOptions::candidates()),
            self.config.max_selections,
        )?;

        let request = GenerationRequest::new(
            self.config.model.clone(),
            vec![Message::system(prompt.system), Message::user(prompt.user)],
        )
        .with_json_output()
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        let response = self.llm.generate(request).await?;
        let content = response.first_content().ok_or_else(|| {
            GenerationError::MalformedOutput("response contained no choices".to_string())
        })?;

        let raw = parse_json::<RawSelections>(content)
            .map_err(|e| GenerationError::MalformedOutput(e.to_string()))?
            .into_vec();

        let selections = Self::resolve(&candidates, raw, self.config.max_selections);
        tracing::info!(
            candidates = candidates.len(),
            selected = selections.len(),
            "Post selection completed"
        );
        Ok(selections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::LlmError;
    use crate::llm::{Choice, GenerationResponse, Usage};
    use crate::social::Post;

    struct FixedLlm {
        content: String,
        calls: AtomicUsize,
    }

    impl FixedLlm {
        fn new(content: &str) -> Arc<Self> {
            Arc::new(Self {
                content: content.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for FixedLlm {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.temperature, Some(0.1));
            Ok(GenerationResponse {
                id: "gen".to_string(),
                model: "test".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(self.content.clone()),
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

    fn candidates() -> Vec<PostWithContext> {
        vec![
            Post::new("1", "alice", "is this a good idea?", "1").into(),
            Post::new("2", "bob", "giveaway!!!", "2").into(),
            Post::new("3", "carol", "thoughts on rust async?", "3").into(),
        ]
    }

    #[tokio::test]
    async fn test_selects_known_ids_and_drops_unknown() {
        let llm = FixedLlm::new(
            r#"Here you go:
```json
{"selections": [
  {"post_id": "3", "reason": "technical question"},
  {"post_id": "99", "reason": "hallucinated"},
  {"post_id": "1", "reason": "asks for opinions"},
  {"post_id": "3", "reason": "duplicate"}
]}
```"#,
        );
        let finder = PostFinder::new(llm, PostFinderConfig::default());

        let picks = finder.select(candidates()).await.expect("select");
        let ids: Vec<&str> = picks.iter().map(|s| s.post.id()).collect();
        assert_eq!(ids, vec!["3", "1"]);
        assert_eq!(picks[0].reason, "technical question");
    }

    #[tokio::test]
    async fn test_accepts_bare_list() {
        let llm = FixedLlm::new(r#"[{"tweet_id": "2", "reason": "why not"}]"#);
        let finder = PostFinder::new(llm, PostFinderConfig::default());

        let picks = finder.select(candidates()).await.expect("select");
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].post.author(), "bob");
    }

    #[tokio::test]
    async fn test_respects_max_selections() {
        let llm = FixedLlm::new(
            r#"{"selections": [{"post_id": "1"}, {"post_id": "2"}, {"post_id": "3"}]}"#,
        );
        let finder = PostFinder::new(llm, PostFinderConfig::default().with_max_selections(2));

        let picks = finder.select(candidates()).await.expect("select");
        assert_eq!(picks.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_candidates_skip_the_model() {
        let llm = FixedLlm::new("{}");
        let finder = PostFinder::new(llm.clone(), PostFinderConfig::default());

        assert!(finder.select(Vec::new()).await.expect("select").is_empty());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unparseable_output_is_malformed() {
        let finder = PostFinder::new(FixedLlm::new("no idea"), PostFinderConfig::default());
        let err = finder.select(candidates()).await.expect_err("malformed");
        assert!(matches!(err, GenerationError::MalformedOutput(_)));
    }
}
