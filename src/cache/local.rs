//! Local Cache Module
//!
//! Process-local mirror of remote records, checked before any network round-trip.
//! Entries expire lazily: an expired entry reads as absent and is purged on access.

use dashmap::DashMap;
use tracing::trace;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::stats::StatsCounters;
use crate::cache::{CacheEntry, CacheStats};

// == Local Cache ==
/// Concurrent key to serialized-value map with per-key expiry.
///
/// Shared between facade callers and the invalidation subscriber; every
/// operation touches a single key and needs no outer lock.
#[derive(Debug, Default)]
pub struct LocalCache {
    /// Key-value storage
    entries: DashMap<String, CacheEntry>,
    /// Performance statistics
    stats: StatsCounters,
}

impl LocalCache {
    // == Constructor ==
    /// Creates an empty local cache.
    pub fn new() -> Self {
        Self::default()
    }

    // == Check ==
    /// Returns true iff an unexpired entry exists for `key`.
    pub fn check(&self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => true,
            Some(entry) => {
                drop(entry);
                self.purge_if_expired(key);
                false
            }
            None => false,
        }
    }

    // == Get ==
    /// Retrieves the serialized value for `key` if present and unexpired.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.value.clone()),
            Some(entry) => {
                drop(entry);
                self.purge_if_expired(key);
                None
            }
            None => None,
        };

        match value {
            Some(value) => {
                self.stats.record_hit();
                Some(value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    // == Set ==
    /// Stores `value` under `key` for `ttl_seconds`, overwriting any previous entry.
    ///
    /// A non-positive TTL means the value is already stale: the key is dropped
    /// instead of being stored. Returns whether an entry was stored.
    pub fn set(&self, key: &str, value: String, ttl_seconds: i64) -> bool {
        if ttl_seconds <= 0 {
            trace!(key = %key, ttl_seconds, "not caching already-expired value");
            self.entries.remove(key);
            return false;
        }

        self.entries
            .insert(key.to_string(), CacheEntry::new(value, ttl_seconds as u64));
        true
    }

    // == Delete ==
    /// Removes `key`; returns whether an entry was present. Absent keys are not an error.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    // == TTL ==
    /// Remaining lifetime of `key` in milliseconds, `None` if absent or expired.
    pub fn ttl_ms(&self, key: &str) -> Option<u64> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.ttl_remaining_ms())
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from the cache.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = current_timestamp_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before.saturating_sub(self.entries.len());

        self.stats.record_expirations(removed as u64);
        removed
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.entries.len())
    }

    // == Length ==
    /// Returns the number of entries physically held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge_if_expired(&self, key: &str) {
        // A concurrent set may have replaced the entry since it was read.
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired())
            .is_some()
        {
            self.stats.record_expirations(1);
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_local_new() {
        let cache = LocalCache::new();
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_local_set_and_get() {
        let cache = LocalCache::new();

        assert!(cache.set("key1", "\"value1\"".to_string(), 60));
        assert_eq!(cache.get("key1").as_deref(), Some("\"value1\""));
        assert!(cache.check("key1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_local_get_nonexistent() {
        let cache = LocalCache::new();
        assert!(cache.get("nonexistent").is_none());
        assert!(!cache.check("nonexistent"));
    }

    #[test]
    fn test_local_delete() {
        let cache = LocalCache::new();

        cache.set("key1", "1".to_string(), 60);
        assert!(cache.delete("key1"));

        assert!(cache.is_empty());
        assert!(cache.get("key1").is_none());
    }

    #[test]
    fn test_local_delete_nonexistent_is_noop() {
        let cache = LocalCache::new();
        assert!(!cache.delete("nonexistent"));
    }

    #[test]
    fn test_local_overwrite() {
        let cache = LocalCache::new();

        cache.set("key1", "1".to_string(), 60);
        cache.set("key1", "2".to_string(), 60);

        assert_eq!(cache.get("key1").as_deref(), Some("2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_local_non_positive_ttl_not_stored() {
        let cache = LocalCache::new();

        assert!(!cache.set("zero", "1".to_string(), 0));
        assert!(!cache.set("negative", "1".to_string(), -6));
        assert!(!cache.check("zero"));
        assert!(!cache.check("negative"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_local_non_positive_ttl_drops_existing() {
        let cache = LocalCache::new();

        cache.set("key1", "1".to_string(), 60);
        cache.set("key1", "2".to_string(), -1);

        assert!(cache.get("key1").is_none());
    }

    #[test]
    fn test_local_ttl_expiration() {
        let cache = LocalCache::new();

        cache.set("key1", "1".to_string(), 1);
        assert!(cache.check("key1"));

        sleep(Duration::from_millis(1100));

        assert!(!cache.check("key1"));
        assert!(cache.get("key1").is_none());
        // Lazily purged on access
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_local_ttl_ms() {
        let cache = LocalCache::new();
        cache.set("key1", "1".to_string(), 10);

        let remaining = cache.ttl_ms("key1").unwrap();
        assert!(remaining <= 10_000);
        assert!(remaining >= 9_000);
        assert!(cache.ttl_ms("missing").is_none());
    }

    #[test]
    fn test_local_stats() {
        let cache = LocalCache::new();

        cache.set("key1", "1".to_string(), 60);
        cache.get("key1"); // hit
        cache.get("nonexistent"); // miss
        cache.check("key1"); // not counted

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_local_cleanup_expired() {
        let cache = LocalCache::new();

        cache.set("key1", "1".to_string(), 1);
        cache.set("key2", "2".to_string(), 10);

        sleep(Duration::from_millis(1100));

        let removed = cache.cleanup_expired();
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.check("key2"));
    }

    #[test]
    fn test_local_concurrent_access() {
        let cache = Arc::new(LocalCache::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("k{}", i % 20);
                        match (t + i) % 3 {
                            0 => {
                                cache.set(&key, format!("{}", i), 60);
                            }
                            1 => {
                                cache.get(&key);
                            }
                            _ => {
                                cache.delete(&key);
                            }
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.len() <= 20);
    }
}
