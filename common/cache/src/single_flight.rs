//! Single-flight cache built on Moka
//!
//! This module provides [`SingleFlightCache`], which combines:
//! - TTL expiry (expired entries are treated as absent on the next lookup)
//! - Strict LRU eviction bounded by entry count
//! - Per-key coalescing of concurrent loads
//!
//! Raw map access is deliberately not exposed: callers either peek with
//! [`SingleFlightCache::get`] or go through [`SingleFlightCache::evaluate_for_key`].

use crate::{CacheConfig, CacheResult, CacheSource, CacheStats};
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A bounded, expiring cache with single-flight evaluation.
///
/// Features:
/// - **TTL**: Each entry expires `ttl` after it was stored.
/// - **LRU eviction**: Once `max_entries` live entries exist, admitting a new
///   one evicts the least recently accessed entry.
/// - **Per-key coalescing**: Concurrent misses for the same key run the loader
///   once; the other callers wait for its result instead of loading again.
///   Different keys load in parallel.
/// - **No negative caching**: A failed load is returned to the caller that ran
///   it and to every caller coalesced onto it, then forgotten. The next lookup
///   for that key runs the loader again.
///
/// Cloning is cheap and clones share the same underlying storage.
///
/// ```text
/// SingleFlightCache {
///     cache: Cache<K, V> {
///         {1: "alice"}: [ctx_a],
///         {1: "bob"}:   [ctx_b, ctx_c],
///     },
///     in flight: {1: "carol"} -> one loader, three waiters
/// }
/// ```
pub struct SingleFlightCache<K, V> {
    cache: Cache<K, V>,
    size_evictions: Arc<AtomicU64>,
    expirations: Arc<AtomicU64>,
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        let size_evictions = Arc::new(AtomicU64::new(0));
        let expirations = Arc::new(AtomicU64::new(0));

        let listener = {
            let size_evictions = size_evictions.clone();
            let expirations = expirations.clone();
            move |_key: Arc<K>, _value: V, cause: RemovalCause| match cause {
                RemovalCause::Size => {
                    size_evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Evicted least recently used cache entry");
                }
                RemovalCause::Expired => {
                    expirations.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
        };

        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            // TinyLFU (the default) may refuse to admit a new key; lookups
            // need every fresh result stored and the oldest access dropped.
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(listener)
            .build();

        Self {
            cache,
            size_evictions,
            expirations,
        }
    }

    /// Returns the live value for `key`, if any, without coordinating with
    /// in-flight loads. Counts as an access for LRU purposes.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.cache.get(key).await
    }

    /// Returns the live value for `key`, or runs `init` to produce it.
    ///
    /// At most one `init` runs per key at a time:
    /// - If cached: returns immediately with [`CacheSource::Cached`]
    /// - If another caller is loading: waits for that load and shares its
    ///   outcome (also [`CacheSource::Cached`] on success)
    /// - Otherwise: runs `init`, stores an `Ok` value and returns it with
    ///   [`CacheSource::Loaded`]
    ///
    /// An `Err` is never stored. It is returned wrapped in an `Arc` because
    /// coalesced waiters receive the same error instance.
    pub async fn evaluate_for_key<F, E>(&self, key: K, init: F) -> Result<CacheResult<V>, Arc<E>>
    where
        F: Future<Output = Result<V, E>>,
        E: Send + Sync + 'static,
    {
        let entry = self.cache.entry(key).or_try_insert_with(init).await?;
        let source = if entry.is_fresh() {
            CacheSource::Loaded
        } else {
            CacheSource::Cached
        };
        Ok(CacheResult::new(entry.into_value(), source))
    }

    /// Applies pending bookkeeping (evictions, expirations, access order).
    /// Moka does this lazily; call it before reading exact stats.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.cache.entry_count(),
            size_evictions: self.size_evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> Clone for SingleFlightCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            size_evictions: Arc::clone(&self.size_evictions),
            expirations: Arc::clone(&self.expirations),
        }
    }
}
