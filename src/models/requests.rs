//! Request DTOs for the admin API

use serde::Deserialize;
use serde_json::Value;

/// Longest key accepted over HTTP.
pub const MAX_KEY_LEN: usize = 256;

/// Request body for PUT /set
///
/// # Fields
/// - `key`: The cache key to store the value under
/// - `value`: Any JSON value; stored in its serialized form
/// - `ttl`: Optional TTL in seconds; missing or non-positive selects the default
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub ttl: Option<i64>,
}

impl SetRequest {
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        validate_key(&self.key)
    }
}

/// Request body for POST /incr/:key
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncrRequest {
    /// Amount to add, 1 when omitted
    #[serde(default)]
    pub delta: Option<i64>,
}

/// Checks a key taken from a path or body.
pub fn validate_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("Key cannot be empty".to_string());
    }
    if key.len() > MAX_KEY_LEN {
        return Some(format!(
            "Key exceeds maximum length of {} characters",
            MAX_KEY_LEN
        ));
    }
    None
}
