//! Reconstructs the threads around a seed post.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::arena::PostArena;
use crate::error::FetchError;
use crate::repository::{PostLookup, PostSearch, Repository};
use crate::social::{PostWithContext, SearchQuery};

/// Maximum number of search results used to stitch a conversation.
pub const THREAD_SEARCH_LIMIT: usize = 20;

/// The two views of a conversation handed to reply generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadResult {
    /// Direct reply chain, oldest first, ending with the seed.
    pub reply_branch_thread: Vec<PostWithContext>,
    /// Longest run of consecutive posts by the root's author, oldest first.
    pub conversation_root_thread: Vec<PostWithContext>,
}

impl ThreadResult {
    /// Distinct handles across the reply branch, in order of appearance.
    pub fn branch_participants(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.reply_branch_thread
            .iter()
            .map(|p| p.author().to_string())
            .filter(|h| seen.insert(h.to_lowercase()))
            .collect()
    }
}

fn mention_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@(\w+)").expect("mention pattern is valid"))
}

/// Handles mentioned in the seed text followed by the seed author.
///
/// Order of first appearance is kept; repeats (case-insensitive) are dropped.
pub fn extract_participants(seed: &PostWithContext) -> Vec<String> {
    let mut seen = HashSet::new();
    mention_pattern()
        .captures_iter(&seed.post.text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .chain(std::iter::once(seed.author().to_string()))
        .filter(|h| !h.is_empty() && seen.insert(h.to_lowercase()))
        .collect()
}

/// Search query for the participants' posts within a conversation.
pub fn build_thread_query(conversation_id: &str, participants: &[String]) -> String {
    let from = participants
        .iter()
        .map(|u| format!("from:{u}"))
        .collect::<Vec<_>>()
        .join(" OR ");
    let to = participants
        .iter()
        .map(|u| format!("to:{u}"))
        .chain(std::iter::once("-is:reply".to_string()))
        .collect::<Vec<_>>()
        .join(" OR ");
    format!("conversation_id:{conversation_id} ({from}) ({to}) -is:retweet")
}

/// Anything that builds a [`ThreadResult`] for a seed post.
pub type ThreadLookup = dyn Repository<PostWithContext, Output = ThreadResult>;

/// Builds a [`ThreadResult`] for a seed post.
///
/// Only depends on two repositories: a post lookup (used for the
/// conversation root) and a post search. Both are normally cache-wrapped.
pub struct ConversationThreadFinder {
    posts: Arc<PostLookup>,
    search: Arc<PostSearch>,
}

impl ConversationThreadFinder {
    pub fn new(posts: Arc<PostLookup>, search: Arc<PostSearch>) -> Self {
        Self { posts, search }
    }
}

#[async_trait]
impl Repository<PostWithContext> for ConversationThreadFinder {
    type Output = ThreadResult;

    async fn read(
        &self,
        seed: &PostWithContext,
        _context: Option<&()>,
    ) -> Result<ThreadResult, FetchError> {
        let conversation_id = seed.conversation_id();
        let participants = extract_participants(seed);

        let root = self
            .posts
            .read(conversation_id, None)
            .await?
            .ok_or_else(|| FetchError::ConversationRootMissing(conversation_id.to_string()))?;
        let root_author = root.author().to_string();

        let query = SearchQuery::new(
            build_thread_query(conversation_id, &participants),
            THREAD_SEARCH_LIMIT,
        );
        let results = self.search.read(&query, None).await?;
        tracing::debug!(
            post_id = %seed.id(),
            conversation_id = %conversation_id,
            participants = participants.len(),
            results = results.len(),
            "Conversation search completed"
        );

        let mut arena = PostArena::new();
        arena.insert(root.clone());
        for post in results {
            arena.insert(post);
        }
        arena.stitch();

        let mut conversation_root_thread = arena.longest_author_chain(&root_author);
        if conversation_root_thread.is_empty() {
            conversation_root_thread.push(root);
        }

        arena.insert(seed.clone());
        arena.stitch();
        let mut reply_branch_thread = arena.branch_to(seed.id());
        if reply_branch_thread.last().map(|p| p.id()) != Some(seed.id()) {
            reply_branch_thread = vec![seed.clone()];
        }

        Ok(ThreadResult {
            reply_branch_thread,
            conversation_root_thread,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::social::Post;

    struct FixedLookup {
        posts: HashMap<String, PostWithContext>,
    }

    #[async_trait]
    impl Repository<str> for FixedLookup {
        type Output = Option<PostWithContext>;

        async fn read(&self, id: &str, _context: Option<&()>) -> Result<Self::Output, FetchError> {
            Ok(self.posts.get(id).cloned())
        }
    }

    struct FixedSearch {
        results: Vec<PostWithContext>,
        queries: Mutex<Vec<SearchQuery>>,
    }

    #[async_trait]
    impl Repository<SearchQuery> for FixedSearch {
        type Output = Vec<PostWithContext>;

        async fn read(
            &self,
            query: &SearchQuery,
            _context: Option<&()>,
        ) -> Result<Self::Output, FetchError> {
            self.queries.lock().unwrap().push(query.clone());
            Ok(self.results.clone())
        }
    }

    fn post(id: &str, author: &str, text: &str) -> Post {
        Post::new(id, author, text, "R")
    }

    fn reply(id: &str, author: &str, text: &str, parent: Post) -> PostWithContext {
        PostWithContext::new(post(id, author, text)).replying_to(parent)
    }

    fn finder(
        lookup: Vec<PostWithContext>,
        results: Vec<PostWithContext>,
    ) -> (ConversationThreadFinder, Arc<FixedSearch>) {
        let lookup = FixedLookup {
            posts: lookup.into_iter().map(|p| (p.id().to_string(), p)).collect(),
        };
        let search = Arc::new(FixedSearch {
            results,
            queries: Mutex::new(Vec::new()),
        });
        let finder = ConversationThreadFinder::new(Arc::new(lookup), search.clone());
        (finder, search)
    }

    fn ids(posts: &[PostWithContext]) -> Vec<&str> {
        posts.iter().map(|p| p.id()).collect()
    }

    #[test]
    fn test_extract_participants() {
        let seed = PostWithContext::new(post("1", "carol", "@alice @Bob what about @alice?"));
        assert_eq!(extract_participants(&seed), vec!["alice", "Bob", "carol"]);

        let seed = PostWithContext::new(post("1", "carol", "no mentions @carol"));
        assert_eq!(extract_participants(&seed), vec!["carol"]);
    }

    #[test]
    fn test_build_thread_query() {
        let query = build_thread_query("123", &["alice".to_string(), "bob".to_string()]);
        assert_eq!(
            query,
            "conversation_id:123 (from:alice OR from:bob) (to:alice OR to:bob OR -is:reply) -is:retweet"
        );
    }

    #[tokio::test]
    async fn test_reconstructs_branch_and_root_thread() {
        let r = post("R", "alice", "root");
        let r1 = reply("R1", "alice", "part two", r.clone());
        let r2 = reply("R2", "bob", "@alice nice", r1.post.clone());
        let r3 = reply("R3", "alice", "@bob thanks", r2.post.clone());

        let (finder, search) = finder(
            vec![PostWithContext::new(r.clone())],
            vec![PostWithContext::new(r.clone()), r1, r2],
        );

        let result = finder.read(&r3, None).await.expect("thread");
        assert_eq!(ids(&result.conversation_root_thread), vec!["R", "R1"]);
        assert_eq!(ids(&result.reply_branch_thread), vec!["R", "R1", "R2", "R3"]);

        let queries = search.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].max_results, THREAD_SEARCH_LIMIT);
        assert!(queries[0].query.starts_with("conversation_id:R (from:bob OR from:alice)"));
    }

    #[tokio::test]
    async fn test_empty_search_yields_root_only() {
        let r = post("R", "alice", "root");
        let seed = reply("S", "alice", "follow-up", r.clone());

        let (finder, _) = finder(vec![PostWithContext::new(r)], Vec::new());
        let result = finder.read(&seed, None).await.expect("thread");

        assert_eq!(ids(&result.conversation_root_thread), vec!["R"]);
        assert_eq!(ids(&result.reply_branch_thread), vec!["R", "S"]);
    }

    #[tokio::test]
    async fn test_unknown_parent_falls_back_to_shallow_reply() {
        let r = post("R", "alice", "root");
        let detached_parent = post("P", "bob", "somewhere deep");
        let seed = reply("S", "carol", "@bob hi", detached_parent);

        let (finder, _) = finder(vec![PostWithContext::new(r)], Vec::new());
        let result = finder.read(&seed, None).await.expect("thread");

        assert_eq!(ids(&result.reply_branch_thread), vec!["P", "S"]);
        assert_eq!(result.branch_participants(), vec!["bob", "carol"]);
    }

    #[tokio::test]
    async fn test_missing_root_is_permanent_error() {
        let seed = PostWithContext::new(post("S", "alice", "hello"));
        let (finder, search) = finder(Vec::new(), Vec::new());

        let err = finder.read(&seed, None).await.expect_err("root missing");
        assert!(matches!(err, FetchError::ConversationRootMissing(ref id) if id == "R"));
        assert!(!err.is_transient());
        assert!(search.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_seed_without_parent_is_its_own_branch() {
        let r = post("R", "alice", "root");
        let (finder, _) = finder(vec![PostWithContext::new(r.clone())], Vec::new());

        let result = finder.read(&PostWithContext::new(r), None).await.expect("thread");
        assert_eq!(ids(&result.reply_branch_thread), vec!["R"]);
        assert_eq!(ids(&result.conversation_root_thread), vec!["R"]);
    }
}
