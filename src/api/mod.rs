//! API Module
//!
//! HTTP handlers and routing for the admin REST API.
//!
//! # Endpoints
//! - `PUT /set` - Store a value through the facade
//! - `GET /get/:key` - Read a value, local cache first
//! - `DELETE /del/:key` - Delete a key everywhere
//! - `GET /exists/:key` - Remote and local existence
//! - `POST /incr/:key` - Atomic increment
//! - `DELETE /scan/:pattern` - Delete every key matching a glob
//! - `GET /stats` - Facade statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
