//! Conversation reconstruction.
//!
//! Given one post, [`ConversationThreadFinder`] recovers the reply chain
//! leading to it and the longest run of posts by the conversation's original
//! author. Search results are partial and noisy; whatever cannot be linked is
//! left out rather than guessed.

pub mod arena;
pub mod finder;

pub use arena::PostArena;
pub use finder::{
    build_thread_query, extract_participants, ConversationThreadFinder, ThreadLookup, ThreadResult,
    THREAD_SEARCH_LIMIT,
};
