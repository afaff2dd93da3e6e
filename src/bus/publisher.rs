//! Invalidation Publisher
//!
//! Bounded queue between facade writers and the store's PUBLISH command.
//! Writers never wait on broadcast delivery: events are queued with
//! `try_send` and a single worker task drains the queue.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::InvalidationEvent;
use crate::store::RemoteStore;

// == Publisher ==
/// Handle used by the facade to queue invalidation events.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: mpsc::Sender<InvalidationEvent>,
}

impl Publisher {
    /// Spawns the publish worker and returns the queue handle with the worker's JoinHandle.
    ///
    /// # Arguments
    /// * `store` - Store whose PUBLISH carries the events
    /// * `channel` - Channel name every instance subscribes to
    /// * `capacity` - Maximum number of queued, unsent events
    /// * `shutdown` - Flips to `true` when the owner stops; queued events are
    ///   still sent before the worker exits
    pub fn spawn(
        store: Arc<dyn RemoteStore>,
        channel: String,
        capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run(store, channel, rx, shutdown));
        (Self { tx }, handle)
    }

    /// Queues `event` for broadcast. Returns false if it was dropped.
    ///
    /// A full queue drops the event with a warning; receivers then converge
    /// through their own local TTL.
    pub fn publish(&self, event: InvalidationEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(key = %event.key, "publish queue full, dropping invalidation event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(key = %event.key, "publisher stopped, dropping invalidation event");
                false
            }
        }
    }

    /// Number of events waiting to be sent.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

async fn run(
    store: Arc<dyn RemoteStore>,
    channel: String,
    mut rx: mpsc::Receiver<InvalidationEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(channel = %channel, "invalidation publisher started");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => send(store.as_ref(), &channel, &event).await,
                None => break,
            },
            _ = shutdown.changed() => {
                // Refuse new events but flush what is already queued.
                rx.close();
                let mut flushed = 0usize;
                while let Some(event) = rx.recv().await {
                    send(store.as_ref(), &channel, &event).await;
                    flushed += 1;
                }
                info!(flushed, "invalidation publisher stopped");
                return;
            }
        }
    }

    info!("invalidation publisher stopped");
}

async fn send(store: &dyn RemoteStore, channel: &str, event: &InvalidationEvent) {
    let payload = match event.encode() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(key = %event.key, error = %e, "failed to encode invalidation event");
            return;
        }
    };

    match store.publish(channel, &payload).await {
        Ok(()) => debug!(key = %event.key, action = ?event.action, "published invalidation"),
        Err(e) => warn!(key = %event.key, error = %e, "failed to publish invalidation"),
    }
}
