//! Namespaced caching for the pipeline: canonicalized SHA-256 keys, an
//! in-process TTL+LRU tier, a Redis tier that degrades to miss, and the
//! manager that composes them (including the two-tier asset-context path).

pub mod keys;
pub mod manager;
pub mod memory;
pub mod redis_tier;

pub use keys::Namespace;
pub use manager::{CacheHealth, CacheManager, CacheStats};
