//! Caching decorator for repositories.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::store::{CacheError, CacheStore};
use crate::error::FetchError;
use crate::repository::Repository;

/// How a cache key is derived from a repository input.
pub enum CacheKeying<I: ?Sized> {
    /// `cache:{name}:{json(input)}`.
    Named(String),
    /// Caller-supplied key function.
    Derived(Arc<dyn Fn(&I) -> String + Send + Sync>),
}

impl<I: ?Sized> CacheKeying<I> {
    pub fn named(name: impl Into<String>) -> Self {
        CacheKeying::Named(name.into())
    }

    pub fn derived(f: impl Fn(&I) -> String + Send + Sync + 'static) -> Self {
        CacheKeying::Derived(Arc::new(f))
    }
}

impl<I: ?Sized> Clone for CacheKeying<I> {
    fn clone(&self) -> Self {
        match self {
            CacheKeying::Named(name) => CacheKeying::Named(name.clone()),
            CacheKeying::Derived(f) => CacheKeying::Derived(Arc::clone(f)),
        }
    }
}

impl<I: ?Sized> fmt::Debug for CacheKeying<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKeying::Named(name) => f.debug_tuple("Named").field(name).finish(),
            CacheKeying::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

/// Read-through cache around a repository.
///
/// A hit returns the stored value without touching the wrapped repository.
/// A miss performs exactly one underlying read and one store. Concurrent
/// misses on one key are not coalesced; both read and the last write wins.
///
/// Absent results (`None`) are cached like any other value, so a post that
/// was missing stays missing until it is invalidated.
pub struct CachingRepository<R, I: ?Sized> {
    inner: R,
    store: CacheStore,
    keying: CacheKeying<I>,
    enabled: bool,
}

impl<R, I> CachingRepository<R, I>
where
    I: ?Sized + Serialize,
{
    /// Wraps `inner`, caching into `store`.
    ///
    /// With `enabled == false` every read goes straight to `inner` and
    /// nothing is stored.
    pub fn new(inner: R, store: CacheStore, keying: CacheKeying<I>, enabled: bool) -> Self {
        Self {
            inner,
            store,
            keying,
            enabled,
        }
    }

    /// Computes the cache key for `input`.
    pub fn key_for(&self, input: &I) -> Result<String, CacheError> {
        match &self.keying {
            CacheKeying::Named(name) => {
                Ok(format!("cache:{}:{}", name, serde_json::to_string(input)?))
            }
            CacheKeying::Derived(f) => Ok(f(input)),
        }
    }

    /// Drops the cached value for `input`. Returns whether one existed.
    pub async fn invalidate(&self, input: &I) -> Result<bool, CacheError> {
        let key = self.key_for(input)?;
        let removed = self.store.delete(&key).await?;
        tracing::debug!(key = %key, removed, "Cache entry invalidated");
        Ok(removed)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The wrapped repository.
    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R, I, C> Repository<I, C> for CachingRepository<R, I>
where
    R: Repository<I, C>,
    R::Output: Serialize + DeserializeOwned,
    I: ?Sized + Serialize + Sync,
    C: ?Sized + Sync,
{
    type Output = R::Output;

    async fn read(&self, input: &I, context: Option<&C>) -> Result<Self::Output, FetchError> {
        if !self.enabled {
            return self.inner.read(input, context).await;
        }

        let key = self.key_for(input)?;

        if let Some(raw) = self.store.get(&key).await? {
            match serde_json::from_str::<R::Output>(&raw) {
                Ok(value) => {
                    tracing::debug!(key = %key, "Cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    // Shape changed since the entry was written
                    tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                }
            }
        }

        tracing::debug!(key = %key, "Cache miss");
        let value = self.inner.read(input, context).await?;
        let raw = serde_json::to_string(&value)?;
        self.store.put(&key, &raw).await?;
        Ok(value)
    }
}
