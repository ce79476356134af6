//! Index-based arena used to stitch partial search results into reply chains.
//!
//! Posts arrive with one level of context (`reply_to` is a shallow copy).
//! The arena keeps one node per post id and links each node to the node of
//! the post it replies to, so chains longer than one hop can be walked.

use std::collections::{HashMap, HashSet};

use crate::social::PostWithContext;

#[derive(Debug, Clone)]
struct Node {
    post: PostWithContext,
    parent: Option<usize>,
}

/// Arena of posts keyed by id, with parent links by index.
///
/// Owned by a single reconstruction; callers only get cloned posts back.
#[derive(Debug, Default)]
pub struct PostArena {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl PostArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a post and returns its index.
    ///
    /// A post whose id is already present replaces the stored content but
    /// keeps its original position.
    pub fn insert(&mut self, post: PostWithContext) -> usize {
        if let Some(&idx) = self.index.get(post.id()) {
            self.nodes[idx].post = post;
            return idx;
        }
        let idx = self.nodes.len();
        self.index.insert(post.id().to_string(), idx);
        self.nodes.push(Node { post, parent: None });
        idx
    }

    /// Adds referenced parents that are missing, then links every node to
    /// the node of the post it replies to.
    ///
    /// Safe to call repeatedly; links are recomputed from scratch each time.
    pub fn stitch(&mut self) {
        let missing: Vec<PostWithContext> = self
            .nodes
            .iter()
            .filter_map(|n| n.post.reply_to.as_ref())
            .filter(|parent| !self.index.contains_key(parent.id.as_str()))
            .map(|parent| PostWithContext::new(parent.clone()))
            .collect();
        for parent in missing {
            // Two nodes may reference the same missing parent
            if !self.index.contains_key(parent.id()) {
                self.insert(parent);
            }
        }

        for idx in 0..self.nodes.len() {
            let parent = self.nodes[idx]
                .post
                .reply_to_id()
                .and_then(|id| self.index.get(id).copied())
                .filter(|&p| p != idx);
            self.nodes[idx].parent = parent;
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the node holding `id`.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn post(&self, idx: usize) -> Option<&PostWithContext> {
        self.nodes.get(idx).map(|n| &n.post)
    }

    pub fn parent(&self, idx: usize) -> Option<usize> {
        self.nodes.get(idx).and_then(|n| n.parent)
    }

    /// Chain from the oldest reachable ancestor down to `id`, inclusive.
    ///
    /// Empty when `id` is not in the arena.
    pub fn branch_to(&self, id: &str) -> Vec<PostWithContext> {
        let Some(start) = self.position(id) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut chain = Vec::new();
        let mut current = Some(start);
        while let Some(idx) = current {
            if !seen.insert(idx) {
                break;
            }
            chain.push(self.nodes[idx].post.clone());
            current = self.nodes[idx].parent;
        }
        chain.reverse();
        chain
    }

    /// Longest chain of consecutive posts by `author`, oldest first.
    ///
    /// Walks start at chain tips (author nodes no other author node replies
    /// to) in insertion order and follow parent links while the author
    /// matches. A node visited by one walk ends every later walk that reaches
    /// it. Ties keep the first chain found.
    pub fn longest_author_chain(&self, author: &str) -> Vec<PostWithContext> {
        let by_author = |idx: usize| self.nodes[idx].post.post.is_authored_by(author);

        let mut has_author_child = vec![false; self.nodes.len()];
        for idx in (0..self.nodes.len()).filter(|&i| by_author(i)) {
            if let Some(parent) = self.nodes[idx].parent.filter(|&p| by_author(p)) {
                has_author_child[parent] = true;
            }
        }

        let tips = (0..self.nodes.len()).filter(|&i| by_author(i) && !has_author_child[i]);
        // Only reachable with cyclic links, where no node is a tip
        let rest = (0..self.nodes.len()).filter(|&i| by_author(i) && has_author_child[i]);

        let mut visited = HashSet::new();
        let mut longest: Vec<usize> = Vec::new();
        for start in tips.chain(rest) {
            if visited.contains(&start) {
                continue;
            }
            let mut walk = Vec::new();
            let mut current = Some(start);
            while let Some(idx) = current {
                if !by_author(idx) || !visited.insert(idx) {
                    break;
                }
                walk.push(idx);
                current = self.nodes[idx].parent;
            }
            if walk.len() > longest.len() {
                longest = walk;
            }
        }

        longest
            .into_iter()
            .rev()
            .map(|idx| self.nodes[idx].post.clone())
            .collect()
    }
}
