//! dcache - A distributed read-through/write-through cache
//!
//! Keeps per-process local caches coherent over a shared Redis store using
//! TTL skewing and a pub/sub invalidation channel.

pub mod api;
pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod facade;
pub mod models;
pub mod store;
pub mod tasks;

pub use api::AppState;
pub use config::Config;
pub use error::{DcacheError, Result};
pub use facade::{Dcache, DcacheOptions, DcacheStats};
pub use tasks::spawn_cleanup_task;
