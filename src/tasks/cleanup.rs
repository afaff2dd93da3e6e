//! Local Sweep Task
//!
//! Background task that periodically removes expired local cache entries.
//! Reads already treat expired entries as absent; the sweep only bounds memory.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::LocalCache;

/// Spawns a background task that periodically sweeps expired local entries.
///
/// # Arguments
/// * `cache` - Local cache shared with the facade
/// * `cleanup_interval_secs` - Interval in seconds between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, aborted by the owner on shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(LocalCache::new());
/// let sweep = spawn_cleanup_task(cache.clone(), 30);
/// // Later, during shutdown:
/// sweep.abort();
/// ```
pub fn spawn_cleanup_task(cache: Arc<LocalCache>, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "starting local sweep task");

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.cleanup_expired();
            if removed > 0 {
                info!(removed, "local sweep removed expired entries");
            } else {
                debug!("local sweep found no expired entries");
            }
        }
    })
}
