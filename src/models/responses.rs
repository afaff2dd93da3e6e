//! Response DTOs for the admin API

use serde::Serialize;
use serde_json::Value;

use crate::facade::DcacheStats;
use crate::store::StoreMode;

/// Response body for GET /get/:key
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub key: String,
    pub value: Value,
}

impl GetResponse {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Response body for PUT /set
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    pub key: String,
    /// TTL actually applied, after default substitution
    pub ttl: u64,
}

impl SetResponse {
    pub fn new(key: impl Into<String>, ttl: u64) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
            ttl,
        }
    }
}

/// Response body for DELETE /del/:key
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    pub key: String,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for GET /exists/:key
#[derive(Debug, Clone, Serialize)]
pub struct ExistsResponse {
    pub key: String,
    /// Key exists in the remote store
    pub remote: bool,
    /// Key has a live entry in this instance's local cache
    pub local: bool,
}

/// Response body for POST /incr/:key
#[derive(Debug, Clone, Serialize)]
pub struct IncrResponse {
    pub key: String,
    pub value: i64,
}

/// Response body for DELETE /scan/:pattern
#[derive(Debug, Clone, Serialize)]
pub struct ScanDeleteResponse {
    pub pattern: String,
    pub deleted: usize,
}

/// Response body for GET /stats
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub instance: String,
    pub mode: StoreMode,
    pub bus_active: bool,
    pub queued_events: usize,
    /// Local cache hits
    pub hits: u64,
    /// Local cache misses
    pub misses: u64,
    /// Local entries dropped on expiry
    pub expirations: u64,
    /// Current number of local entries
    pub total_entries: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl From<DcacheStats> for StatsResponse {
    fn from(stats: DcacheStats) -> Self {
        Self {
            hit_rate: stats.local.hit_rate(),
            instance: stats.instance,
            mode: stats.mode,
            bus_active: stats.bus_active,
            queued_events: stats.queued_events,
            hits: stats.local.hits,
            misses: stats.local.misses,
            expirations: stats.local.expirations,
            total_entries: stats.local.total_entries,
        }
    }
}

/// Response body for GET /health
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy" when the store answers PING, "degraded" otherwise
    pub status: String,
    pub store: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn new(store_reachable: bool, mode: StoreMode) -> Self {
        Self {
            status: if store_reachable { "healthy" } else { "degraded" }.to_string(),
            store: mode.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
