//! Cache configuration types and cache operation results
//!
//! This module contains the core types used throughout the cache:
//! - [`CacheConfig`]: Configuration for cache instances (entry bound, TTL)
//! - [`CacheSource`]: Enum indicating where a value came from (for observability)
//! - [`CacheResult`]: Wrapper containing a value and its source
//! - [`CacheStats`]: Point-in-time counters

use std::fmt;
use std::time::Duration;

/// Configuration for cache instances
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of live entries. Admitting one more evicts the least
    /// recently used entry.
    pub max_entries: u64,

    /// Time after insertion at which an entry stops being returned
    pub ttl: Duration,
}

impl CacheConfig {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        Self { max_entries, ttl }
    }

    /// Create a cache configuration with a TTL in milliseconds
    pub fn with_ttl_millis(max_entries: u64, ttl_millis: u64) -> Self {
        Self::new(max_entries, Duration::from_millis(ttl_millis))
    }
}

/// Indicates where a value came from
///
/// This type implements `Display` for use in logging and metrics:
/// ```
/// # use common_cache::CacheSource;
/// let source = CacheSource::Cached;
/// assert_eq!(source.to_string(), "cached");
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Value was already cached, or was loaded by a concurrent caller this
    /// caller waited on
    Cached,
    /// This caller ran the loader and stored its result
    Loaded,
}

impl fmt::Display for CacheSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheSource::Cached => write!(f, "cached"),
            CacheSource::Loaded => write!(f, "loaded"),
        }
    }
}

/// Result of a cache evaluation with source information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheResult<V> {
    pub value: V,

    /// Where the result came from - provides context for observability
    pub source: CacheSource,
}

impl<V> CacheResult<V> {
    pub fn new(value: V, source: CacheSource) -> Self {
        Self { value, source }
    }

    /// Check if the value was served without this caller running the loader
    pub fn was_cached(&self) -> bool {
        matches!(self.source, CacheSource::Cached)
    }

    /// Check if this caller ran the loader
    pub fn invoked_loader(&self) -> bool {
        matches!(self.source, CacheSource::Loaded)
    }

    pub fn into_value(self) -> V {
        self.value
    }
}

/// Point-in-time cache counters
///
/// Entry counts are eventually consistent; call
/// [`SingleFlightCache::run_pending_tasks`](crate::SingleFlightCache::run_pending_tasks)
/// first when an exact figure matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entry_count: u64,
    /// Entries removed to make room for new ones
    pub size_evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
}
