//! Error types for the distributed cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Dcache Error Enum ==
/// Unified error type for the cache facade, the remote store and the admin API.
#[derive(Error, Debug)]
pub enum DcacheError {
    /// Error reported by the Redis client
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Remote store unreachable or refusing work
    #[error("Connection error: {0}")]
    Connection(String),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Command not supported by the active store backend
    #[error("Unsupported command: {0}")]
    Unsupported(&'static str),

    /// Stored value has the wrong type for the command
    #[error("Wrong type: {0}")]
    WrongType(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key not found
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A scan-delete stopped part way; `deleted` keys are already gone
    #[error("Scan delete aborted after {deleted} keys: {source}")]
    PartialScanDelete {
        deleted: usize,
        #[source]
        source: Box<DcacheError>,
    },
}

impl DcacheError {
    /// Number of keys removed before a scan-delete failed, if this is such an error.
    pub fn deleted_count(&self) -> Option<usize> {
        match self {
            DcacheError::PartialScanDelete { deleted, .. } => Some(*deleted),
            _ => None,
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for DcacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            DcacheError::NotFound(_) => StatusCode::NOT_FOUND,
            DcacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DcacheError::WrongType(_) => StatusCode::CONFLICT,
            DcacheError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            DcacheError::Redis(_) | DcacheError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            DcacheError::PartialScanDelete { .. } => StatusCode::BAD_GATEWAY,
            DcacheError::Serialization(_) | DcacheError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = match &self {
            DcacheError::PartialScanDelete { deleted, .. } => Json(json!({
                "error": self.to_string(),
                "deleted": deleted,
            })),
            _ => Json(json!({
                "error": self.to_string()
            })),
        };

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, DcacheError>;
