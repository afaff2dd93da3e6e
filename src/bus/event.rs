//! Invalidation Event Module
//!
//! Wire format for the change notifications broadcast between cache instances.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{DcacheError, Result};

/// Length of a generated instance name.
pub const INSTANCE_NAME_LEN: usize = 16;

// == Action ==
/// What happened to the key. Encoded as an integer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Action {
    Set = 1,
    Delete = 2,
}

impl From<Action> for u8 {
    fn from(action: Action) -> u8 {
        action as u8
    }
}

impl TryFrom<u8> for Action {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Action::Set),
            2 => Ok(Action::Delete),
            other => Err(format!("unknown invalidation action {}", other)),
        }
    }
}

// == Invalidation Event ==
/// A set or delete another instance should mirror into its local cache.
///
/// Legacy publishers use capitalised field names (`From`, `Act`, `Key`,
/// `Val`, `Ttl`); both spellings decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Instance name of the publisher
    #[serde(alias = "From")]
    pub origin: String,
    #[serde(alias = "Act")]
    pub action: Action,
    #[serde(alias = "Key")]
    pub key: String,
    /// Serialized value, empty for deletes
    #[serde(alias = "Val", default)]
    pub value: String,
    /// TTL in seconds, 0 for deletes
    #[serde(alias = "Ttl", default)]
    pub ttl: i64,
}

impl InvalidationEvent {
    /// Event announcing that `key` now holds `value` for `ttl` seconds.
    pub fn set(origin: &str, key: &str, value: &str, ttl: i64) -> Self {
        Self {
            origin: origin.to_string(),
            action: Action::Set,
            key: key.to_string(),
            value: value.to_string(),
            ttl,
        }
    }

    /// Event announcing that `key` was deleted.
    pub fn delete(origin: &str, key: &str) -> Self {
        Self {
            origin: origin.to_string(),
            action: Action::Delete,
            key: key.to_string(),
            value: String::new(),
            ttl: 0,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(DcacheError::from)
    }

    /// Whether this event was published by the instance named `instance`.
    pub fn is_from(&self, instance: &str) -> bool {
        self.origin == instance
    }
}

/// Random alphanumeric name identifying one cache instance.
pub fn generate_instance_name() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INSTANCE_NAME_LEN)
        .map(char::from)
        .collect()
}
