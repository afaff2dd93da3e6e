//! Background Tasks Module
//!
//! # Tasks
//! - Local sweep: removes expired local cache entries at configured intervals

mod cleanup;

pub use cleanup::spawn_cleanup_task;
