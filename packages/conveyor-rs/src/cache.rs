//! Response caching for queries that opt in.
//!
//! The cache is an accelerator, never an authority: a hit serves the
//! stored value without running the handler, and every kind of cache
//! problem (transport fault, undecodable entry) degrades to a miss with
//! a warning. Only successes are stored; a failure must be recomputed on
//! every call so it clears as soon as the underlying cause does.
//!
//! Entries are opaque JSON blobs keyed by the query's
//! [`cache_key`](crate::CacheableQuery::cache_key), which must fully
//! describe the query's inputs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::handler::Next;
use crate::outcome::Outcome;

// =============================================================================
// Cache Contract
// =============================================================================

/// Key/value store for serialized query results.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// The live entry for `key`, if one exists.
    async fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration)
        -> anyhow::Result<()>;
}

// =============================================================================
// In-Memory Cache
// =============================================================================

#[derive(Debug)]
struct CachedEntry {
    value: serde_json::Value,
    expires_at: tokio::time::Instant,
}

/// Process-local [`ResponseCache`] with lazy expiry.
///
/// Deadlines use `tokio::time::Instant`, so tests running under a paused
/// clock can advance time deterministically.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: DashMap<String, CachedEntry>,
}

impl InMemoryCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, counting expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries exist.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ResponseCache for InMemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        if let Some(entry) = self.entries.get(key) {
            if tokio::time::Instant::now() < entry.expires_at {
                return Ok(Some(entry.value.clone()));
            }
        }
        // The read guard is gone here; removing under it would deadlock
        // the shard. Removing an absent key is a no-op.
        self.entries.remove(key);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        self.entries.insert(
            key.to_string(),
            CachedEntry {
                value,
                expires_at: tokio::time::Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

// =============================================================================
// Cache Behavior
// =============================================================================

/// Serves cached successes and stores fresh ones.
pub struct CacheBehavior {
    cache: Arc<dyn ResponseCache>,
}

impl CacheBehavior {
    /// Build from the configured cache.
    pub fn new(cache: Arc<dyn ResponseCache>) -> Self {
        Self { cache }
    }

    /// Serve from cache or run the rest of the chain and store the result.
    pub async fn handle<T>(&self, key: &str, ttl: Duration, next: Next<'_, T>) -> Outcome<T>
    where
        T: Serialize + DeserializeOwned,
    {
        match self.cache.get(key).await {
            Ok(Some(cached)) => match serde_json::from_value::<T>(cached) {
                Ok(value) => return Outcome::success(value),
                Err(err) => {
                    tracing::warn!(
                        key,
                        error = %err,
                        "cached value could not be decoded, treating as a miss"
                    );
                }
            },
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    key,
                    error = %format!("{err:#}"),
                    "response cache read failed, treating as a miss"
                );
            }
        }

        let outcome = next.run().await;

        if let Outcome::Success { value, .. } = &outcome {
            match serde_json::to_value(value) {
                Ok(encoded) => {
                    if let Err(err) = self.cache.set(key, encoded, ttl).await {
                        tracing::warn!(
                            key,
                            error = %format!("{err:#}"),
                            "response cache write failed"
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        key,
                        error = %err,
                        "query result could not be encoded for caching"
                    );
                }
            }
        }

        outcome
    }
}
