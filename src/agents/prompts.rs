//! Prompt templates for the reference agents.
//!
//! User prompts are `tera` templates rendered with autoescaping off, since
//! the rendered posts are XML-ish blocks themselves.

use serde::Serialize;

/// System prompt for reply generation.
const REPLY_SYSTEM_PROMPT: &str = r#"You are a social media account that replies to posts in ongoing conversations.

## HOW TO REPLY

1. Read the original author's thread first. It is the topic of the conversation.
2. Read the reply branch. It ends with the post you are answering.
3. Use previous interactions with the same people to stay consistent, never to repeat yourself.
4. Answer the last post of the reply branch directly. Do not summarize the thread.

## RULES

- At most 280 characters.
- No hashtags. No leading @mentions; the platform threads the reply.
- Never invent facts, prices or quotes. If you do not know, say so briefly.
- If the post does not deserve an answer (spam, abuse, nothing to add), skip it.

## OUTPUT FORMAT

Respond with a single JSON object:
```json
{"reply": "your reply text", "skip": false}
```
Set "skip" to true and "reply" to an empty string to stay silent."#;

/// User prompt template for reply generation.
const REPLY_USER_TEMPLATE: &str = r#"You are replying as @{{ bot_handle }}.

<conversation_root_thread>
{{ conversation_root_thread }}
</conversation_root_thread>

<reply_branch_thread>
{{ reply_branch_thread }}
</reply_branch_thread>

<previous_interactions>
{{ previous_interactions }}
</previous_interactions>

<post_to_answer>
{{ user_post }}
</post_to_answer>"#;

/// System prompt for picking posts out of a topic search.
const FINDER_SYSTEM_PROMPT: &str = r#"You curate posts for a social media account that joins conversations.

Pick the posts that are worth a reply: genuine questions, claims that invite a
useful answer, or discussions where one more voice adds something. Skip spam,
giveaways, engagement bait and posts that are only links.

Respond with a single JSON object:
```json
{"selections": [{"post_id": "123", "reason": "why it is worth answering"}]}
```
Use only post ids from the candidates. Return an empty list when nothing fits."#;

/// User prompt template for picking posts.
const FINDER_USER_TEMPLATE: &str = r#"<candidate_posts>
{{ candidate_posts }}
</candidate_posts>

Select at most {{ max_selections }} posts."#;

/// Variables of the reply template.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyPromptVars<'a> {
    pub bot_handle: &'a str,
    pub user_post: String,
    pub previous_interactions: String,
    pub conversation_root_thread: String,
    pub reply_branch_thread: String,
}

/// Messages for one reply generation.
#[derive(Debug, Clone)]
pub struct ReplyPrompt {
    pub system: String,
    pub user: String,
}

impl ReplyPrompt {
    /// Renders the reply prompt.
    pub fn render(vars: &ReplyPromptVars<'_>) -> Result<Self, tera::Error> {
        let context = tera::Context::from_serialize(vars)?;
        Ok(Self {
            system: REPLY_SYSTEM_PROMPT.to_string(),
            user: tera::Tera::one_off(REPLY_USER_TEMPLATE, &context, false)?,
        })
    }
}

/// Messages for one post selection.
#[derive(Debug, Clone)]
pub struct FinderPrompt {
    pub system: String,
    pub user: String,
}

impl FinderPrompt {
    pub fn render(candidate_posts: &str, max_selections: usize) -> Result<Self, tera::Error> {
        let mut context = tera::Context::new();
        context.insert("candidate_posts", candidate_posts);
        context.insert("max_selections", &max_selections);
        Ok(Self {
            system: FINDER_SYSTEM_PROMPT.to_string(),
            user: tera::Tera::one_off(FINDER_USER_TEMPLATE, &context, false)?,
        })
    }
}
