//! Text rendering of posts for prompts.
//!
//! Posts are rendered as lightweight XML-ish blocks, which models follow
//! reliably when a prompt mixes several threads.

use std::sync::OnceLock;

use regex::Regex;

use super::types::PostWithContext;

/// What to include when rendering a post.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub include_reply_to: bool,
    pub include_engagement: bool,
    pub include_post_id: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            include_reply_to: true,
            include_engagement: false,
            include_post_id: false,
        }
    }
}

impl RenderOptions {
    /// Rendering used inside threads, where the parent is the previous entry.
    pub fn in_thread() -> Self {
        Self {
            include_reply_to: false,
            ..Default::default()
        }
    }

    /// Rendering used for candidate lists that the model picks ids from.
    pub fn candidates() -> Self {
        Self {
            include_reply_to: true,
            include_engagement: true,
            include_post_id: true,
        }
    }
}

/// Renders one post.
pub fn format_post(post: &PostWithContext, options: RenderOptions) -> String {
    let mut out = String::from("<post>\n");

    if options.include_post_id {
        out.push_str(&format!("  <post_id>{}</post_id>\n", post.id()));
    }
    out.push_str(&format!("  <username>{}</username>\n", post.author()));
    out.push_str(&format!("  <text>{}</text>\n", post.post.text));

    if options.include_reply_to {
        if let Some(parent) = &post.reply_to {
            out.push_str(&format!(
                "  <reply_to>\n    <username>{}</username>\n    <text>{}</text>\n  </reply_to>\n",
                parent.author_handle, parent.text
            ));
        }
    }

    if let Some(quoted) = &post.quoted {
        out.push_str(&format!(
            "  <quoted_post>@{}: {}</quoted_post>\n",
            quoted.author_handle, quoted.text
        ));
    }

    for media in &post.post.media {
        out.push_str(&format!(
            "  <media url=\"{}\"><description>{}</description></media>\n",
            media.url,
            media.description.as_deref().unwrap_or("")
        ));
    }

    if options.include_engagement {
        let e = post.post.engagement.unwrap_or_default();
        out.push_str(&format!(
            "  <engagement>Replies: {}, Likes: {}, Quotes: {}, Reposts: {}</engagement>\n",
            e.reply_count, e.like_count, e.quote_count, e.repost_count
        ));
    }

    out.push_str("</post>");
    out
}

/// Renders a sequence of posts, one block per post.
pub fn format_posts(posts: &[PostWithContext], options: RenderOptions) -> String {
    posts
        .iter()
        .map(|p| format_post(p, options))
        .collect::<Vec<_>>()
        .join("\n")
}

fn leading_mentions() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:@\w+\s*)+").expect("leading mention pattern is valid"))
}

/// Removes the run of `@handle` mentions a reply would otherwise start with.
///
/// The platform already threads the reply, so repeating the handles only
/// eats into the character budget.
pub fn strip_leading_mentions(text: &str) -> String {
    leading_mentions().replace(text, "").trim().to_string()
}
