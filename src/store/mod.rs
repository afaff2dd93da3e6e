//! Remote Store Module
//!
//! One capability trait over the authoritative key-value store. The facade only
//! talks to [`RemoteStore`]; which transport sits behind it is decided once, at
//! construction, by [`connect`].
//!
//! # Backends
//! - [`redis::RedisStore`] - single node or sharded cluster, picked by address count
//! - [`memory::MemoryStore`] - in-process store for tests and local development

pub mod memory;
pub mod redis;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DcacheError, Result};

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

// == Store Mode ==
/// Which transport backs a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    Single,
    Cluster,
    Memory,
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreMode::Single => f.write_str("single"),
            StoreMode::Cluster => f.write_str("cluster"),
            StoreMode::Memory => f.write_str("memory"),
        }
    }
}

// == Scan Cursor ==
/// Position of an in-progress SCAN.
///
/// `node` selects which node is being walked (always 0 outside cluster mode),
/// `position` is that node's own cursor. Iteration is complete when a page
/// comes back with [`ScanCursor::START`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCursor {
    pub node: usize,
    pub position: u64,
}

impl ScanCursor {
    pub const START: ScanCursor = ScanCursor {
        node: 0,
        position: 0,
    };

    pub fn is_start(&self) -> bool {
        *self == Self::START
    }
}

// == Geo Types ==
/// A named point for GEOADD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
}

/// Distance unit for geo commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoUnit {
    #[default]
    M,
    Km,
    Mi,
    Ft,
}

/// Options for GEORADIUS / GEORADIUSBYMEMBER.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoRadiusQuery {
    pub radius: f64,
    pub unit: GeoUnit,
    pub with_coord: bool,
    pub with_dist: bool,
    pub count: Option<usize>,
    /// `Some(true)` sorts nearest first, `Some(false)` farthest first
    pub ascending: Option<bool>,
}

/// One result of a radius search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoMatch {
    pub name: String,
    pub dist: Option<f64>,
    /// `(longitude, latitude)`
    pub coord: Option<(f64, f64)>,
}

// == Subscription ==
/// A live subscription to one pub/sub channel.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next message payload.
    ///
    /// `Ok(None)` means the subscription stream has ended; `Err` is a receive
    /// failure that leaves the stream usable if the store is still alive.
    async fn recv(&mut self) -> Result<Option<String>>;
}

// == Remote Store ==
/// Capabilities the cache needs from the authoritative store.
///
/// TTL values follow Redis semantics: `-2` for a missing key, `-1` for a key
/// without expiry, otherwise remaining seconds.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    fn mode(&self) -> StoreMode;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// SET with an expiry in seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// SET NX; `ttl_secs == 0` stores without expiry. Returns whether the key was set.
    async fn set_nx(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    /// DEL; returns the number of keys removed.
    async fn del(&self, key: &str) -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn ttl(&self, key: &str) -> Result<i64>;

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// One SCAN page of at most roughly `count` keys matching `pattern`.
    async fn scan(
        &self,
        cursor: ScanCursor,
        pattern: &str,
        count: usize,
    ) -> Result<(ScanCursor, Vec<String>)>;

    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>>;

    /// Liveness probe.
    async fn ping(&self) -> Result<()>;

    // == Sorted Sets ==
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<u64>;

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    async fn zrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>>;

    async fn zrevrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>>;

    async fn zrem(&self, key: &str, member: &str) -> Result<u64>;

    async fn zcard(&self, key: &str) -> Result<u64>;

    // == Geo ==
    async fn geo_add(&self, _key: &str, _locations: &[GeoLocation]) -> Result<u64> {
        Err(DcacheError::Unsupported("GEOADD"))
    }

    async fn geo_pos(&self, _key: &str, _members: &[String]) -> Result<Vec<Option<(f64, f64)>>> {
        Err(DcacheError::Unsupported("GEOPOS"))
    }

    async fn geo_dist(
        &self,
        _key: &str,
        _member1: &str,
        _member2: &str,
        _unit: GeoUnit,
    ) -> Result<Option<f64>> {
        Err(DcacheError::Unsupported("GEODIST"))
    }

    async fn geo_radius(
        &self,
        _key: &str,
        _longitude: f64,
        _latitude: f64,
        _query: &GeoRadiusQuery,
    ) -> Result<Vec<GeoMatch>> {
        Err(DcacheError::Unsupported("GEORADIUS"))
    }

    async fn geo_radius_by_member(
        &self,
        _key: &str,
        _member: &str,
        _query: &GeoRadiusQuery,
    ) -> Result<Vec<GeoMatch>> {
        Err(DcacheError::Unsupported("GEORADIUSBYMEMBER"))
    }

    async fn geo_hash(&self, _key: &str, _members: &[String]) -> Result<Vec<Option<String>>> {
        Err(DcacheError::Unsupported("GEOHASH"))
    }
}

/// Connects to the remote store: one address selects single-node mode,
/// several select cluster mode.
pub async fn connect(addrs: &[String], password: Option<&str>) -> Result<Arc<dyn RemoteStore>> {
    let store = match addrs {
        [] => {
            return Err(DcacheError::Config(
                "at least one store address is required".to_string(),
            ))
        }
        [addr] => RedisStore::connect_single(addr, password).await?,
        _ => RedisStore::connect_cluster(addrs, password).await?,
    };
    Ok(Arc::new(store))
}
