//! Read-through cache for repository lookups.
//!
//! [`CachingRepository`] wraps any [`Repository`](crate::repository::Repository)
//! and memoizes its output in the [`CacheStore`] table. Entries never expire
//! on their own; callers drop them with
//! [`CachingRepository::invalidate`].
//!
//! # Keying
//!
//! - [`CacheKeying::Named`]: `cache:{name}:{json(input)}`
//! - [`CacheKeying::Derived`]: any pure function of the input, for inputs
//!   whose JSON form is unwieldy or unstable
//!
//! Keys depend only on the logical input, so entries stay valid across
//! restarts.

pub mod read_through;
pub mod store;

pub use read_through::{CacheKeying, CachingRepository};
pub use store::{CacheError, CacheStore};
