//! In-process lookup cache shared by every concurrent caller of one lookup source
//!
//! This crate provides [`SingleFlightCache`], a bounded, expiring cache that
//! coalesces concurrent misses for the same key. It supports:
//!
//! - TTL expiry of entries
//! - Least-recently-used eviction once the configured entry count is reached
//! - Single-flight evaluation: at most one loader runs per key at a time
//! - Failed loads are handed to every coalesced waiter but never stored
//! - Rich return types indicating whether the caller ran the loader
//!
//! # Example
//!
//! ```rust,ignore
//! use common_cache::{CacheConfig, CacheSource, SingleFlightCache};
//!
//! let cache = SingleFlightCache::new(CacheConfig::new(3000, Duration::from_secs(60)));
//!
//! // Cheap check, no coordination with other callers
//! if let Some(value) = cache.get(&key).await {
//!     return Ok(value);
//! }
//!
//! let result = cache
//!     .evaluate_for_key(key, async { load_from_source().await })
//!     .await?;
//!
//! match result.source {
//!     CacheSource::Cached => println!("Another caller loaded it"),
//!     CacheSource::Loaded => println!("We ran the loader"),
//! }
//! ```

pub mod single_flight;
pub mod types;

pub use single_flight::SingleFlightCache;
pub use types::{CacheConfig, CacheResult, CacheSource, CacheStats};
