//! Cache Facade
//!
//! Read-through/write-through cache over a [`RemoteStore`], with a local
//! mirror kept coherent across instances by the invalidation bus.
//!
//! # Coherence
//! - Writes go to the store first; only a successful write touches the local
//!   cache and is broadcast.
//! - Reads repopulate the local cache with the remote TTL minus a skew, so a
//!   local copy always expires before the record it mirrors.
//! - Events from other instances are applied by the subscriber loop; a lost
//!   event is bounded by the local TTL.
//!
//! Remote failures are logged and turned into `false`/`None`. `scan_delete`,
//! `incr_by` and the sorted-set and geo pass-throughs return the store error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{generate_instance_name, spawn_subscriber, InvalidationEvent, Publisher, Subscriber};
use crate::cache::{CacheStats, LocalCache};
use crate::config::Config;
use crate::error::{DcacheError, Result};
use crate::store::{self, GeoLocation, GeoMatch, GeoRadiusQuery, GeoUnit, RemoteStore, ScanCursor, StoreMode};
use crate::tasks::spawn_cleanup_task;

// == Options ==
/// Tunables for one facade instance.
#[derive(Debug, Clone)]
pub struct DcacheOptions {
    /// TTL in seconds used when a caller passes a non-positive TTL
    pub default_ttl: u64,
    /// Seconds subtracted from the remote TTL on read repopulation
    pub ttl_skew: u64,
    /// Keys requested per SCAN page
    pub scan_count: usize,
    /// Invalidation channel name
    pub channel: String,
    /// Publish queue capacity
    pub publish_queue_size: usize,
    /// Local sweep interval in seconds, 0 disables the sweep
    pub cleanup_interval: u64,
    /// Fixed instance name; a random one is generated when unset
    pub instance_name: Option<String>,
}

impl Default for DcacheOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for DcacheOptions {
    fn from(config: &Config) -> Self {
        Self {
            default_ttl: config.default_ttl,
            ttl_skew: config.ttl_skew,
            scan_count: config.scan_count,
            channel: config.sync_channel.clone(),
            publish_queue_size: config.publish_queue_size,
            cleanup_interval: config.cleanup_interval,
            instance_name: None,
        }
    }
}

// == Stats ==
/// Facade-level statistics.
#[derive(Debug, Clone, Serialize)]
pub struct DcacheStats {
    pub instance: String,
    pub mode: StoreMode,
    /// Whether the invalidation subscriber is still running
    pub bus_active: bool,
    /// Invalidation events waiting to be published
    pub queued_events: usize,
    pub local: CacheStats,
}

#[derive(Default)]
struct Tasks {
    subscriber: Option<JoinHandle<()>>,
    publisher: Option<JoinHandle<()>>,
    sweep: Option<JoinHandle<()>>,
}

struct Inner {
    instance: String,
    store: Arc<dyn RemoteStore>,
    local: Arc<LocalCache>,
    publisher: Publisher,
    bus_active: Arc<AtomicBool>,
    options: DcacheOptions,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Tasks>,
}

// == Dcache ==
/// Handle to a running cache instance. Cloning shares the instance.
#[derive(Clone)]
pub struct Dcache {
    inner: Arc<Inner>,
}

impl Dcache {
    // == Lifecycle ==
    /// Starts a facade over `store`: subscribes to the invalidation channel and
    /// spawns the publisher and the local sweep.
    ///
    /// A failed subscription is logged and the instance runs without
    /// cross-instance sync.
    pub async fn start(store: Arc<dyn RemoteStore>, options: DcacheOptions) -> Self {
        let instance = options
            .instance_name
            .clone()
            .unwrap_or_else(generate_instance_name);
        let local = Arc::new(LocalCache::new());
        let bus_active = Arc::new(AtomicBool::new(false));
        let (shutdown, _) = watch::channel(false);

        let subscriber = match store.subscribe(&options.channel).await {
            Ok(subscription) => Some(spawn_subscriber(
                Subscriber {
                    store: store.clone(),
                    local: local.clone(),
                    instance: instance.clone(),
                    channel: options.channel.clone(),
                    active: bus_active.clone(),
                },
                subscription,
                shutdown.subscribe(),
            )),
            Err(e) => {
                warn!(
                    channel = %options.channel,
                    error = %e,
                    "failed to subscribe, running without cross-instance sync"
                );
                None
            }
        };

        let (publisher, publisher_handle) = Publisher::spawn(
            store.clone(),
            options.channel.clone(),
            options.publish_queue_size,
            shutdown.subscribe(),
        );

        let sweep = (options.cleanup_interval > 0)
            .then(|| spawn_cleanup_task(local.clone(), options.cleanup_interval));

        info!(instance = %instance, mode = %store.mode(), "dcache started");

        Self {
            inner: Arc::new(Inner {
                instance,
                store,
                local,
                publisher,
                bus_active,
                options,
                shutdown,
                tasks: Mutex::new(Tasks {
                    subscriber,
                    publisher: Some(publisher_handle),
                    sweep,
                }),
            }),
        }
    }

    /// Connects to the store named by `config` and starts a facade over it.
    pub async fn connect(config: &Config) -> Result<Self> {
        let store = store::connect(&config.redis_addrs, config.redis_password.as_deref()).await?;
        Ok(Self::start(store, DcacheOptions::from(config)).await)
    }

    /// Stops the subscriber and the sweep, then flushes queued invalidation
    /// events. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        if let Some(sweep) = tasks.sweep {
            sweep.abort();
        }
        for handle in [tasks.subscriber, tasks.publisher].into_iter().flatten() {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }

        info!(instance = %self.inner.instance, "dcache stopped");
    }

    // == Accessors ==
    /// Name tagged on every event this instance publishes.
    pub fn instance_name(&self) -> &str {
        &self.inner.instance
    }

    pub fn mode(&self) -> StoreMode {
        self.inner.store.mode()
    }

    pub fn local(&self) -> &Arc<LocalCache> {
        &self.inner.local
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.inner.store
    }

    /// Whether the invalidation subscriber is still running.
    pub fn bus_active(&self) -> bool {
        self.inner.bus_active.load(Ordering::SeqCst)
    }

    /// Liveness probe against the store.
    pub async fn ping(&self) -> Result<()> {
        self.inner.store.ping().await
    }

    pub fn stats(&self) -> DcacheStats {
        DcacheStats {
            instance: self.inner.instance.clone(),
            mode: self.mode(),
            bus_active: self.bus_active(),
            queued_events: self.inner.publisher.queued(),
            local: self.inner.local.stats(),
        }
    }

    // == Check ==
    /// Authoritative existence check against the store. Errors read as false.
    pub async fn check(&self, key: &str) -> bool {
        match self.inner.store.exists(key).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(key = %key, error = %e, "exists failed");
                false
            }
        }
    }

    /// Existence check against the local cache only.
    pub fn check_mem(&self, key: &str) -> bool {
        self.inner.local.check(key)
    }

    // == Get ==
    /// Reads `key`, local cache first, then the store.
    ///
    /// A remote hit repopulates the local cache with the remote TTL minus the
    /// skew; when that leaves nothing, the value is returned but not cached.
    /// Misses, store errors and undecodable values all return `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(raw) = self.inner.local.get(key) {
            return decode(key, &raw);
        }

        let raw = match self.inner.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "get failed");
                return None;
            }
        };
        let value = decode(key, &raw)?;

        match self.inner.store.ttl(key).await {
            Ok(ttl) => {
                let local_ttl = ttl - self.inner.options.ttl_skew as i64;
                debug!(key = %key, ttl, local_ttl, "loaded from store");
                self.inner.local.set(key, raw, local_ttl);
            }
            Err(e) => warn!(key = %key, error = %e, "ttl failed, value not cached locally"),
        }

        Some(value)
    }

    // == Set ==
    /// Writes `value` to the store, then to the local cache, then queues a
    /// `set` event. A non-positive `ttl` selects the default TTL.
    ///
    /// Returns false if the value could not be serialized or the store write
    /// failed; nothing local changes in that case.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: i64) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to serialize value");
                return false;
            }
        };
        let ttl = self.effective_ttl(ttl);

        if let Err(e) = self.inner.store.set_ex(key, &raw, ttl).await {
            warn!(key = %key, error = %e, "set failed");
            return false;
        }

        let event = InvalidationEvent::set(&self.inner.instance, key, &raw, ttl as i64);
        self.inner.local.set(key, raw, ttl as i64);
        self.inner.publisher.publish(event);
        true
    }

    // == Delete ==
    /// Deletes `key` from the store and the local cache and queues a `delete`
    /// event. Always returns true; a store failure is only logged.
    pub async fn delete(&self, key: &str) -> bool {
        if let Err(e) = self.inner.store.del(key).await {
            warn!(key = %key, error = %e, "delete failed");
        }
        self.inner.local.delete(key);
        self.inner
            .publisher
            .publish(InvalidationEvent::delete(&self.inner.instance, key));
        true
    }

    // == Scan Delete ==
    /// Deletes every store key matching the glob `pattern`, page by page.
    ///
    /// Local caches are not touched and nothing is broadcast. On failure the
    /// error is [`DcacheError::PartialScanDelete`] carrying the number of keys
    /// already deleted.
    pub async fn scan_delete(&self, pattern: &str) -> Result<usize> {
        let store = &self.inner.store;
        let mut cursor = ScanCursor::START;
        let mut deleted = 0usize;

        loop {
            let (next, keys) = match store.scan(cursor, pattern, self.inner.options.scan_count).await {
                Ok(page) => page,
                Err(e) => return Err(partial_scan(pattern, deleted, e)),
            };

            for key in keys {
                match store.del(&key).await {
                    Ok(removed) => deleted += removed as usize,
                    Err(e) => return Err(partial_scan(pattern, deleted, e)),
                }
            }

            if next.is_start() {
                break;
            }
            cursor = next;
        }

        info!(pattern = %pattern, deleted, "scan delete finished");
        Ok(deleted)
    }

    // == Counters ==
    /// Increments `key` by one. The local cache is not updated.
    pub async fn incr(&self, key: &str) -> Option<i64> {
        match self.inner.store.incr_by(key, 1).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "incr failed");
                None
            }
        }
    }

    /// Adds `delta` to `key`. The local cache is not updated.
    pub async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.inner.store.incr_by(key, delta).await
    }

    /// SET NX of a raw string; `ttl_secs == 0` stores without expiry.
    pub async fn set_nx(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        self.inner.store.set_nx(key, value, ttl_secs).await
    }

    // == Sorted Sets ==
    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<u64> {
        self.inner.store.zadd(key, member, score).await
    }

    pub async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.inner.store.zrange(key, start, stop).await
    }

    pub async fn zrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>> {
        self.inner.store.zrange_with_scores(key, start, stop).await
    }

    pub async fn zrevrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>> {
        self.inner.store.zrevrange_with_scores(key, start, stop).await
    }

    pub async fn zrem(&self, key: &str, member: &str) -> Result<u64> {
        self.inner.store.zrem(key, member).await
    }

    pub async fn zcard(&self, key: &str) -> Result<u64> {
        self.inner.store.zcard(key).await
    }

    // == Geo ==
    pub async fn geo_add(&self, key: &str, locations: &[GeoLocation]) -> Result<u64> {
        self.inner.store.geo_add(key, locations).await
    }

    pub async fn geo_pos(&self, key: &str, members: &[String]) -> Result<Vec<Option<(f64, f64)>>> {
        self.inner.store.geo_pos(key, members).await
    }

    pub async fn geo_dist(
        &self,
        key: &str,
        member1: &str,
        member2: &str,
        unit: GeoUnit,
    ) -> Result<Option<f64>> {
        self.inner.store.geo_dist(key, member1, member2, unit).await
    }

    pub async fn geo_radius(
        &self,
        key: &str,
        longitude: f64,
        latitude: f64,
        query: &GeoRadiusQuery,
    ) -> Result<Vec<GeoMatch>> {
        self.inner
            .store
            .geo_radius(key, longitude, latitude, query)
            .await
    }

    pub async fn geo_radius_by_member(
        &self,
        key: &str,
        member: &str,
        query: &GeoRadiusQuery,
    ) -> Result<Vec<GeoMatch>> {
        self.inner.store.geo_radius_by_member(key, member, query).await
    }

    pub async fn geo_hash(&self, key: &str, members: &[String]) -> Result<Vec<Option<String>>> {
        self.inner.store.geo_hash(key, members).await
    }

    /// TTL a `set` with `ttl` would apply: non-positive values select the default.
    /// Never 0, which the store rejects.
    pub fn effective_ttl(&self, ttl: i64) -> u64 {
        if ttl <= 0 {
            self.inner.options.default_ttl.max(1)
        } else {
            ttl as u64
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key = %key, error = %e, "failed to decode cached value");
            None
        }
    }
}

fn partial_scan(pattern: &str, deleted: usize, source: DcacheError) -> DcacheError {
    warn!(pattern = %pattern, deleted, error = %source, "scan delete aborted");
    DcacheError::PartialScanDelete {
        deleted,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn start(store: &Arc<MemoryStore>) -> Dcache {
        let options = DcacheOptions {
            cleanup_interval: 0,
            ..DcacheOptions::default()
        };
        Dcache::start(store.clone(), options).await
    }

    #[test]
    fn test_options_from_config() {
        let options = DcacheOptions::default();
        assert_eq!(options.default_ttl, 3600);
        assert_eq!(options.ttl_skew, 5);
        assert_eq!(options.scan_count, 100);
        assert_eq!(options.channel, "dcach_sync");
        assert!(options.instance_name.is_none());
    }

    #[tokio::test]
    async fn test_set_then_get_local() {
        let store = Arc::new(MemoryStore::new());
        let cache = start(&store).await;

        assert!(cache.set("user:1", &vec![1, 2, 3], 60).await);
        assert!(cache.check_mem("user:1"));
        assert_eq!(cache.get::<Vec<i32>>("user:1").await, Some(vec![1, 2, 3]));
        assert_eq!(cache.stats().local.hits, 1);
    }

    #[tokio::test]
    async fn test_get_repopulates_with_skew() {
        let store = Arc::new(MemoryStore::new());
        store.set_ex("k", "\"v\"", 100).await.unwrap();
        let cache = start(&store).await;

        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("v"));
        let local_ms = cache.local().ttl_ms("k").unwrap();
        assert!(local_ms <= 95_000);
        assert!(local_ms > 90_000);
    }

    #[tokio::test]
    async fn test_get_short_remote_ttl_not_cached() {
        let store = Arc::new(MemoryStore::new());
        store.set_ex("k", "7", 3).await.unwrap();
        let cache = start(&store).await;

        assert_eq!(cache.get::<i32>("k").await, Some(7));
        assert!(!cache.check_mem("k"));
    }

    #[tokio::test]
    async fn test_get_undecodable_returns_none() {
        let store = Arc::new(MemoryStore::new());
        store.set_ex("k", "not json", 100).await.unwrap();
        let cache = start(&store).await;

        assert_eq!(cache.get::<String>("k").await, None);
        assert!(!cache.check_mem("k"));
    }

    #[tokio::test]
    async fn test_get_wrong_type_in_local_returns_none() {
        let store = Arc::new(MemoryStore::new());
        let cache = start(&store).await;

        cache.set("k", "text", 60).await;
        assert_eq!(cache.get::<u32>("k").await, None);
    }

    #[tokio::test]
    async fn test_set_failure_leaves_local_untouched() {
        let store = Arc::new(MemoryStore::new());
        let cache = start(&store).await;
        store.fail_writes(true);

        assert!(!cache.set("k", &1, 60).await);
        assert!(!cache.check_mem("k"));
        assert_eq!(cache.stats().queued_events, 0);
    }

    #[tokio::test]
    async fn test_check_and_delete() {
        let store = Arc::new(MemoryStore::new());
        let cache = start(&store).await;

        cache.set("k", &1, 60).await;
        assert!(cache.check("k").await);

        assert!(cache.delete("k").await);
        assert!(!cache.check("k").await);
        assert!(!cache.check_mem("k"));
        assert!(cache.delete("k").await);
    }

    #[tokio::test]
    async fn test_incr() {
        let store = Arc::new(MemoryStore::new());
        let cache = start(&store).await;

        assert_eq!(cache.incr("n").await, Some(1));
        assert_eq!(cache.incr_by("n", 9).await.unwrap(), 10);
        assert!(!cache.check_mem("n"));

        store.fail_writes(true);
        assert_eq!(cache.incr("n").await, None);
        assert!(cache.incr_by("n", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let cache = start(&store).await;
        assert!(cache.bus_active());

        cache.shutdown().await;
        assert!(!cache.bus_active());
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_default_ttl_still_expires() {
        let store = Arc::new(MemoryStore::new());
        let options = DcacheOptions {
            default_ttl: 0,
            cleanup_interval: 0,
            ..DcacheOptions::default()
        };
        let cache = Dcache::start(store.clone(), options).await;

        assert_eq!(cache.effective_ttl(0), 1);
        assert!(cache.set("k", &1, 0).await);
        assert_eq!(cache.store().ttl("k").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drops_subscription() {
        let store = Arc::new(MemoryStore::new());
        let cache = start(&store).await;
        assert_eq!(store.subscriber_count(), 1);

        cache.shutdown().await;
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_start_without_bus() {
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true);
        let cache = start(&store).await;
        assert!(!cache.bus_active());

        store.set_offline(false);
        assert!(cache.set("k", &1, 60).await);
        assert_eq!(cache.get::<i32>("k").await, Some(1));
    }
}
