//! Request and Response models for the admin API
//!
//! DTOs used for serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

pub use requests::{IncrRequest, SetRequest};
pub use responses::{
    DeleteResponse, ExistsResponse, GetResponse, HealthResponse, IncrResponse, ScanDeleteResponse,
    SetResponse, StatsResponse,
};
