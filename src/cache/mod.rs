//! Cache Module
//!
//! Provides the per-process memory tier with TTL expiration.

mod entry;
mod local;
mod stats;


// Re-export public types
pub use entry::CacheEntry;
pub use local::LocalCache;
pub use stats::CacheStats;
