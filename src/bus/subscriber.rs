//! Invalidation Subscriber
//!
//! Background loop that mirrors other instances' writes into the local cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{Action, InvalidationEvent};
use crate::cache::LocalCache;
use crate::store::{RemoteStore, Subscription};

// == Subscriber ==
/// Everything the subscriber loop needs besides its subscription.
pub struct Subscriber {
    pub store: Arc<dyn RemoteStore>,
    pub local: Arc<LocalCache>,
    /// Events carrying this origin are ignored
    pub instance: String,
    pub channel: String,
    /// Cleared when the loop exits for any reason
    pub active: Arc<AtomicBool>,
}

impl Subscriber {
    /// Decodes one payload and applies it to the local cache.
    ///
    /// Returns true if the local cache was touched. Malformed payloads and
    /// this instance's own events are skipped.
    pub fn apply(&self, payload: &str) -> bool {
        let event = match InvalidationEvent::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "skipping malformed invalidation message");
                return false;
            }
        };

        if event.is_from(&self.instance) {
            return false;
        }

        debug!(key = %event.key, action = ?event.action, origin = %event.origin, "applying invalidation");
        match event.action {
            Action::Set => {
                self.local.set(&event.key, event.value, event.ttl);
            }
            Action::Delete => {
                self.local.delete(&event.key);
            }
        }
        true
    }

    async fn run(self, mut subscription: Box<dyn Subscription>, mut shutdown: watch::Receiver<bool>) {
        info!(channel = %self.channel, instance = %self.instance, "invalidation subscriber started");

        loop {
            let received = tokio::select! {
                _ = shutdown.changed() => {
                    info!("invalidation subscriber stopped");
                    break;
                }
                received = subscription.recv() => received,
            };

            match received {
                Ok(Some(payload)) => {
                    self.apply(&payload);
                }
                Ok(None) => {
                    warn!(channel = %self.channel, "subscription closed, probing store");
                    if let Err(e) = self.store.ping().await {
                        error!(error = %e, "store unreachable, invalidation bus stopped");
                        break;
                    }
                    match self.store.subscribe(&self.channel).await {
                        Ok(fresh) => {
                            info!(channel = %self.channel, "resubscribed to invalidation channel");
                            subscription = fresh;
                        }
                        Err(e) => {
                            error!(error = %e, "resubscribe failed, invalidation bus stopped");
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "invalidation receive failed, probing store");
                    if let Err(e) = self.store.ping().await {
                        error!(error = %e, "store unreachable, invalidation bus stopped");
                        break;
                    }
                }
            }
        }

        self.active.store(false, Ordering::SeqCst);
    }
}

/// Spawns the subscriber loop on an already opened subscription.
///
/// The loop runs until `shutdown` changes (or its sender is dropped), or
/// until the store stops answering PING after a receive failure. In the
/// latter case the instance keeps working against the store alone.
pub fn spawn_subscriber(
    subscriber: Subscriber,
    subscription: Box<dyn Subscription>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    subscriber.active.store(true, Ordering::SeqCst);
    tokio::spawn(subscriber.run(subscription, shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn subscriber(store: Arc<MemoryStore>, local: Arc<LocalCache>) -> Subscriber {
        Subscriber {
            store,
            local,
            instance: "self0000self0000".to_string(),
            channel: "sync".to_string(),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_apply_set_and_delete() {
        let local = Arc::new(LocalCache::new());
        let sub = subscriber(Arc::new(MemoryStore::new()), local.clone());

        let set = InvalidationEvent::set("other", "k", "\"v\"", 60).encode().unwrap();
        assert!(sub.apply(&set));
        assert_eq!(local.get("k"), Some("\"v\"".to_string()));

        let del = InvalidationEvent::delete("other", "k").encode().unwrap();
        assert!(sub.apply(&del));
        assert!(!local.check("k"));
    }

    #[test]
    fn test_apply_ignores_own_events() {
        let local = Arc::new(LocalCache::new());
        let sub = subscriber(Arc::new(MemoryStore::new()), local.clone());
        local.set("k", "\"mine\"".to_string(), 60);

        let own = InvalidationEvent::delete(&sub.instance, "k").encode().unwrap();
        assert!(!sub.apply(&own));
        let own = InvalidationEvent::set(&sub.instance, "j", "1", 60).encode().unwrap();
        assert!(!sub.apply(&own));

        assert!(local.check("k"));
        assert!(!local.check("j"));
    }

    #[test]
    fn test_apply_skips_malformed() {
        let local = Arc::new(LocalCache::new());
        let sub = subscriber(Arc::new(MemoryStore::new()), local.clone());

        assert!(!sub.apply("{broken"));
        assert!(local.is_empty());
    }

    #[tokio::test]
    async fn test_loop_applies_published_events() {
        let store = Arc::new(MemoryStore::new());
        let local = Arc::new(LocalCache::new());
        let (_stop, shutdown) = watch::channel(false);
        let subscription = store.subscribe("sync").await.unwrap();
        let _handle = spawn_subscriber(subscriber(store.clone(), local.clone()), subscription, shutdown);

        let event = InvalidationEvent::set("other", "k", "42", 60).encode().unwrap();
        store.publish("sync", &event).await.unwrap();

        assert!(wait_until(|| local.check("k")).await);
    }

    #[tokio::test]
    async fn test_loop_resubscribes_after_close() {
        let store = Arc::new(MemoryStore::new());
        let local = Arc::new(LocalCache::new());
        let sub = subscriber(store.clone(), local.clone());
        let active = sub.active.clone();
        let (_stop, shutdown) = watch::channel(false);
        let subscription = store.subscribe("sync").await.unwrap();
        let _handle = spawn_subscriber(sub, subscription, shutdown);

        store.close_subscriptions();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(active.load(Ordering::SeqCst));

        let event = InvalidationEvent::set("other", "after", "1", 60).encode().unwrap();
        store.publish("sync", &event).await.unwrap();
        assert!(wait_until(|| local.check("after")).await);
    }

    #[tokio::test]
    async fn test_loop_stops_when_store_unreachable() {
        let store = Arc::new(MemoryStore::new());
        let sub = subscriber(store.clone(), Arc::new(LocalCache::new()));
        let active = sub.active.clone();
        let (_stop, shutdown) = watch::channel(false);
        let subscription = store.subscribe("sync").await.unwrap();
        let handle = spawn_subscriber(sub, subscription, shutdown);
        assert!(active.load(Ordering::SeqCst));

        store.set_offline(true);
        store.close_subscriptions();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("subscriber should exit")
            .unwrap();
        assert!(!active.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let sub = subscriber(store.clone(), Arc::new(LocalCache::new()));
        let active = sub.active.clone();
        let (stop, shutdown) = watch::channel(false);
        let subscription = store.subscribe("sync").await.unwrap();
        let handle = spawn_subscriber(sub, subscription, shutdown);

        stop.send(true).unwrap();
        handle.await.unwrap();
        assert!(!active.load(Ordering::SeqCst));
    }
}
