//! X API v2 client implementing [`SocialPlatform`].
//!
//! Read endpoints authenticate with an app bearer token; posting needs a user
//! access token. Responses carry referenced posts, authors and media in an
//! `includes` block, which is folded back into [`PostWithContext`] values here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::Semaphore;

use super::types::{Engagement, Media, Post, PostWithContext, User};
use super::SocialPlatform;
use crate::error::FetchError;

/// Default API root.
pub const DEFAULT_API_BASE: &str = "https://api.twitter.com/2";

const POST_FIELDS: &str =
    "text,created_at,referenced_tweets,author_id,public_metrics,attachments,conversation_id";
const EXPANSIONS: &str =
    "referenced_tweets.id,author_id,referenced_tweets.id.author_id,attachments.media_keys";
const MEDIA_FIELDS: &str = "url,preview_image_url,type";
const USER_FIELDS: &str = "username,name,description";

/// Search accepts between 10 and 100 results per request.
const SEARCH_MIN_RESULTS: usize = 10;
const SEARCH_MAX_RESULTS: usize = 100;

/// The mentions timeline accepts at least 5 results per request.
const MENTIONS_PAGE_SIZE: usize = 5;

/// HTTP client for the X API v2.
pub struct XApiClient {
    client: Client,
    api_base: String,
    bearer_token: String,
    user_token: Option<String>,
    /// Caps in-flight requests; the platform enforces per-window quotas.
    semaphore: Arc<Semaphore>,
}

impl XApiClient {
    /// Creates a client.
    ///
    /// # Arguments
    ///
    /// * `api_base` - API root, usually [`DEFAULT_API_BASE`]
    /// * `bearer_token` - App token used for reads
    /// * `user_token` - OAuth 2.0 user token, required for posting
    pub fn new(
        api_base: impl Into<String>,
        bearer_token: impl Into<String>,
        user_token: Option<String>,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bearer_token: bearer_token.into(),
            user_token,
            semaphore: Arc::new(Semaphore::new(4)),
        }
    }

    /// Whether a user token is configured, i.e. whether replies can be posted.
    pub fn can_post(&self) -> bool {
        self.user_token.is_some()
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.bearer_token)
            .header("User-Agent", "reply-forge/0.1")
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, FetchError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| FetchError::RequestFailed(format!("rate-limit semaphore closed: {e}")))?;
        Ok(request.send().await?)
    }

    /// Maps non-success statuses onto [`FetchError`]; 404 maps to `Ok(None)`.
    async fn check(response: Response) -> Result<Option<Response>, FetchError> {
        let status = response.status();
        if status.is_success() {
            return Ok(Some(response));
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let reset = response
            .headers()
            .get("x-rate-limit-reset")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(reset = ?reset, "X API rate limit hit");
            return Err(FetchError::RateLimited(match reset {
                Some(r) => format!("quota resets at {r}"),
                None => body,
            }));
        }
        if status == StatusCode::GATEWAY_TIMEOUT || status == StatusCode::REQUEST_TIMEOUT {
            return Err(FetchError::Timeout(format!("HTTP {status}")));
        }

        tracing::warn!(status = %status, body = %body, "X API returned error");
        Err(FetchError::Api {
            code: status.as_u16(),
            message: body,
        })
    }

    async fn fetch_timeline(&self, request: RequestBuilder) -> Result<Vec<PostWithContext>, FetchError> {
        let Some(response) = Self::check(self.send(request).await?).await? else {
            return Ok(Vec::new());
        };
        let page: ApiPage<Vec<ApiPost>> = response
            .json()
            .await
            .map_err(|e| FetchError::ParseError(e.to_string()))?;
        Ok(convert_page(page))
    }
}

#[async_trait]
impl SocialPlatform for XApiClient {
    async fn fetch_post(&self, id: &str) -> Result<Option<PostWithContext>, FetchError> {
        let request = self.get(&format!("/tweets/{id}")).query(&[
            ("tweet.fields", POST_FIELDS),
            ("expansions", EXPANSIONS),
            ("media.fields", MEDIA_FIELDS),
            ("user.fields", USER_FIELDS),
        ]);

        let Some(response) = Self::check(self.send(request).await?).await? else {
            return Ok(None);
        };
        let page: ApiPage<ApiPost> = response
            .json()
            .await
            .map_err(|e| FetchError::ParseError(e.to_string()))?;

        if page.data.is_none() && !page.errors.is_empty() {
            tracing::warn!(post_id = %id, errors = ?page.errors, "post lookup returned errors");
        }
        let lookup = IncludesLookup::new(&page.includes);
        Ok(page.data.map(|raw| lookup.convert(&raw)))
    }

    async fn search_posts(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<PostWithContext>, FetchError> {
        let page_size = max_results.clamp(SEARCH_MIN_RESULTS, SEARCH_MAX_RESULTS).to_string();
        let request = self.get("/tweets/search/recent").query(&[
            ("query", query),
            ("max_results", page_size.as_str()),
            ("tweet.fields", POST_FIELDS),
            ("expansions", EXPANSIONS),
            ("media.fields", MEDIA_FIELDS),
            ("user.fields", USER_FIELDS),
        ]);

        let mut posts = self.fetch_timeline(request).await?;
        posts.truncate(max_results);
        tracing::debug!(query = %query, results = posts.len(), "search completed");
        Ok(posts)
    }

    async fn fetch_user(&self, handle: &str) -> Result<Option<User>, FetchError> {
        let request = self
            .get(&format!("/users/by/username/{handle}"))
            .query(&[("user.fields", USER_FIELDS)]);

        let Some(response) = Self::check(self.send(request).await?).await? else {
            return Ok(None);
        };
        let page: ApiPage<ApiUser> = response
            .json()
            .await
            .map_err(|e| FetchError::ParseError(e.to_string()))?;

        Ok(page.data.map(|u| User {
            id: u.id,
            handle: u.username,
            display_name: u.name,
            description: u.description,
        }))
    }

    async fn fetch_mentions(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PostWithContext>, FetchError> {
        let page_size = MENTIONS_PAGE_SIZE.to_string();
        let mut params = vec![
            ("max_results", page_size),
            ("tweet.fields", POST_FIELDS.to_string()),
            ("expansions", EXPANSIONS.to_string()),
            ("media.fields", MEDIA_FIELDS.to_string()),
            ("user.fields", USER_FIELDS.to_string()),
        ];
        if let Some(since) = since {
            params.push(("start_time", since.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }

        let request = self.get(&format!("/users/{user_id}/mentions")).query(&params);
        self.fetch_timeline(request).await
    }

    async fn post_reply(&self, text: &str, in_reply_to: &str) -> Result<Post, FetchError> {
        let token = self.user_token.as_ref().ok_or_else(|| {
            FetchError::InvalidInput("posting requires a user access token (X_USER_TOKEN)".to_string())
        })?;

        let body = serde_json::json!({
            "text": text,
            "reply": { "in_reply_to_tweet_id": in_reply_to },
        });
        let request = self
            .client
            .post(format!("{}/tweets", self.api_base))
            .bearer_auth(token)
            .header("User-Agent", "reply-forge/0.1")
            .json(&body);

        let response = Self::check(self.send(request).await?)
            .await?
            .ok_or_else(|| FetchError::PostNotFound(in_reply_to.to_string()))?;
        let created: ApiPage<ApiCreated> = response
            .json()
            .await
            .map_err(|e| FetchError::ParseError(e.to_string()))?;
        let created = created
            .data
            .ok_or_else(|| FetchError::ParseError("post creation returned no data".to_string()))?;

        Ok(Post {
            id: created.id,
            author_handle: String::new(),
            text: created.text,
            conversation_id: String::new(),
            created_at: Some(Utc::now()),
            engagement: None,
            media: Vec::new(),
        })
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiPage<T> {
    data: Option<T>,
    #[serde(default)]
    includes: ApiIncludes,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiIncludes {
    #[serde(default)]
    users: Vec<ApiUser>,
    #[serde(default)]
    tweets: Vec<ApiPost>,
    #[serde(default)]
    media: Vec<ApiMedia>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    username: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiPost {
    id: String,
    text: String,
    #[serde(default)]
    author_id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    public_metrics: Option<ApiMetrics>,
    #[serde(default)]
    referenced_tweets: Vec<ApiReference>,
    #[serde(default)]
    attachments: Option<ApiAttachments>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct ApiMetrics {
    #[serde(default)]
    retweet_count: u64,
    #[serde(default)]
    reply_count: u64,
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    quote_count: u64,
    #[serde(default)]
    impression_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiReference {
    #[serde(rename = "type")]
    kind: String,
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiAttachments {
    #[serde(default)]
    media_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMedia {
    media_key: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    preview_image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCreated {
    id: String,
    text: String,
}

/// Index over an `includes` block.
struct IncludesLookup<'a> {
    handles: HashMap<&'a str, &'a str>,
    posts: HashMap<&'a str, &'a ApiPost>,
    media: HashMap<&'a str, &'a ApiMedia>,
}

impl<'a> IncludesLookup<'a> {
    fn new(includes: &'a ApiIncludes) -> Self {
        Self {
            handles: includes
                .users
                .iter()
                .map(|u| (u.id.as_str(), u.username.as_str()))
                .collect(),
            posts: includes.tweets.iter().map(|t| (t.id.as_str(), t)).collect(),
            media: includes
                .media
                .iter()
                .map(|m| (m.media_key.as_str(), m))
                .collect(),
        }
    }

    fn basic(&self, raw: &ApiPost) -> Post {
        let author_handle = raw
            .author_id
            .as_deref()
            .and_then(|id| self.handles.get(id).copied())
            .unwrap_or("unknown")
            .to_string();

        // Only photos are kept; video thumbnails carry no useful text context.
        let media = raw
            .attachments
            .as_ref()
            .map(|a| {
                a.media_keys
                    .iter()
                    .filter_map(|key| self.media.get(key.as_str()))
                    .filter(|m| m.kind == "photo")
                    .filter_map(|m| m.url.clone().or_else(|| m.preview_image_url.clone()))
                    .map(|url| Media {
                        url,
                        description: None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Post {
            id: raw.id.clone(),
            author_handle,
            text: raw.text.clone(),
            conversation_id: raw.conversation_id.clone().unwrap_or_else(|| raw.id.clone()),
            created_at: raw.created_at,
            engagement: raw.public_metrics.map(|m| Engagement {
                reply_count: m.reply_count,
                like_count: m.like_count,
                quote_count: m.quote_count,
                repost_count: m.retweet_count,
                impression_count: m.impression_count,
            }),
            media,
        }
    }

    fn convert(&self, raw: &ApiPost) -> PostWithContext {
        let mut post = PostWithContext::new(self.basic(raw));
        for reference in &raw.referenced_tweets {
            let Some(referenced) = self.posts.get(reference.id.as_str()) else {
                continue;
            };
            match reference.kind.as_str() {
                "replied_to" => post.reply_to = Some(self.basic(referenced)),
                "quoted" => post.quoted = Some(self.basic(referenced)),
                _ => {}
            }
        }
        post
    }
}

fn convert_page(page: ApiPage<Vec<ApiPost>>) -> Vec<PostWithContext> {
    let lookup = IncludesLookup::new(&page.includes);
    page.data
        .unwrap_or_default()
        .iter()
        .map(|raw| lookup.convert(raw))
        .collect()
}
