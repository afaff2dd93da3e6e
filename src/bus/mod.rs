//! Invalidation Bus Module
//!
//! Broadcasts local writes to every instance sharing the remote store, over
//! the store's own pub/sub channel.
//!
//! # Components
//! - `InvalidationEvent`: wire record, tagged with the publishing instance
//! - `Publisher`: bounded queue drained by one publish worker
//! - `Subscriber`: loop applying other instances' events to the local cache

mod event;
mod publisher;
mod subscriber;

pub use event::{generate_instance_name, Action, InvalidationEvent, INSTANCE_NAME_LEN};
pub use publisher::Publisher;
pub use subscriber::{spawn_subscriber, Subscriber};
