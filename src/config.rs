//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Remote store node addresses; one address selects single-node mode
    pub redis_addrs: Vec<String>,
    /// Optional password for the remote store
    pub redis_password: Option<String>,
    /// TTL in seconds substituted when a caller passes a non-positive TTL
    pub default_ttl: u64,
    /// Seconds subtracted from the remote TTL when repopulating the local cache
    pub ttl_skew: u64,
    /// Keys requested per SCAN page
    pub scan_count: usize,
    /// Pub/sub channel carrying invalidation events
    pub sync_channel: String,
    /// Capacity of the bounded publish queue
    pub publish_queue_size: usize,
    /// Background sweep interval in seconds, 0 disables the sweep
    pub cleanup_interval: u64,
    /// HTTP server port of the admin binary
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `REDIS_ADDRS` - Comma separated node addresses (default: 127.0.0.1:6379)
    /// - `REDIS_PASSWORD` - Store password (default: none)
    /// - `DEFAULT_TTL` - Default TTL in seconds, 0 is ignored (default: 3600)
    /// - `TTL_SKEW` - Local TTL reduction in seconds (default: 5)
    /// - `SCAN_COUNT` - Keys per SCAN page (default: 100)
    /// - `SYNC_CHANNEL` - Invalidation channel (default: dcach_sync)
    /// - `PUBLISH_QUEUE_SIZE` - Publish queue capacity (default: 1024)
    /// - `CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 30)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_addrs: env::var("REDIS_ADDRS")
                .ok()
                .map(|v| parse_addrs(&v))
                .filter(|addrs| !addrs.is_empty())
                .unwrap_or(defaults.redis_addrs),
            redis_password: env::var("REDIS_PASSWORD").ok().filter(|v| !v.is_empty()),
            default_ttl: parse_var("DEFAULT_TTL")
                .filter(|ttl: &u64| *ttl > 0)
                .unwrap_or(defaults.default_ttl),
            ttl_skew: parse_var("TTL_SKEW").unwrap_or(defaults.ttl_skew),
            scan_count: parse_var("SCAN_COUNT").unwrap_or(defaults.scan_count),
            sync_channel: env::var("SYNC_CHANNEL")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.sync_channel),
            publish_queue_size: parse_var("PUBLISH_QUEUE_SIZE")
                .unwrap_or(defaults.publish_queue_size),
            cleanup_interval: parse_var("CLEANUP_INTERVAL").unwrap_or(defaults.cleanup_interval),
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_addrs: vec!["127.0.0.1:6379".to_string()],
            redis_password: None,
            default_ttl: 3600,
            ttl_skew: 5,
            scan_count: 100,
            sync_channel: "dcach_sync".to_string(),
            publish_queue_size: 1024,
            cleanup_interval: 30,
            server_port: 3000,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Splits a comma separated address list, dropping blanks.
pub fn parse_addrs(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.redis_addrs, vec!["127.0.0.1:6379".to_string()]);
        assert!(config.redis_password.is_none());
        assert_eq!(config.default_ttl, 3600);
        assert_eq!(config.ttl_skew, 5);
        assert_eq!(config.scan_count, 100);
        assert_eq!(config.sync_channel, "dcach_sync");
        assert_eq!(config.server_port, 3000);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("REDIS_ADDRS");
        env::remove_var("REDIS_PASSWORD");
        env::remove_var("DEFAULT_TTL");
        env::remove_var("TTL_SKEW");
        env::remove_var("SCAN_COUNT");
        env::remove_var("SYNC_CHANNEL");

        let config = Config::from_env();
        assert_eq!(config.redis_addrs.len(), 1);
        assert_eq!(config.default_ttl, 3600);
        assert_eq!(config.ttl_skew, 5);
        assert_eq!(config.scan_count, 100);
        assert_eq!(config.sync_channel, "dcach_sync");

        env::set_var("DEFAULT_TTL", "0");
        assert_eq!(Config::from_env().default_ttl, 3600);
        env::set_var("DEFAULT_TTL", "90");
        assert_eq!(Config::from_env().default_ttl, 90);
        env::remove_var("DEFAULT_TTL");
    }

    #[test]
    fn test_parse_addrs() {
        assert_eq!(
            parse_addrs("10.0.0.1:7000, 10.0.0.2:7000,,10.0.0.3:7000 "),
            vec!["10.0.0.1:7000", "10.0.0.2:7000", "10.0.0.3:7000"]
        );
        assert!(parse_addrs(" , ").is_empty());
    }
}
