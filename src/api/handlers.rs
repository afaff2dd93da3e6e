//! API Handlers
//!
//! HTTP request handlers for each admin endpoint.

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use crate::error::{DcacheError, Result};
use crate::facade::Dcache;
use crate::models::requests::validate_key;
use crate::models::{
    DeleteResponse, ExistsResponse, GetResponse, HealthResponse, IncrRequest, IncrResponse,
    ScanDeleteResponse, SetRequest, SetResponse, StatsResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: Dcache,
}

impl AppState {
    pub fn new(cache: Dcache) -> Self {
        Self { cache }
    }
}

fn check_key(key: &str) -> Result<()> {
    match validate_key(key) {
        Some(message) => Err(DcacheError::InvalidRequest(message)),
        None => Ok(()),
    }
}

/// Handler for PUT /set
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(DcacheError::InvalidRequest(error_msg));
    }

    let ttl = req.ttl.unwrap_or(0);
    if !state.cache.set(&req.key, &req.value, ttl).await {
        return Err(DcacheError::Connection(format!(
            "failed to store key '{}'",
            req.key
        )));
    }

    let applied = state.cache.effective_ttl(ttl);
    Ok(Json(SetResponse::new(req.key, applied)))
}

/// Handler for GET /get/:key
///
/// Absent keys, unreachable stores and undecodable values all answer 404.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    match state.cache.get::<Value>(&key).await {
        Some(value) => Ok(Json(GetResponse::new(key, value))),
        None => Err(DcacheError::NotFound(key)),
    }
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    check_key(&key)?;
    state.cache.delete(&key).await;

    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for GET /exists/:key
pub async fn exists_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<ExistsResponse> {
    let remote = state.cache.check(&key).await;
    let local = state.cache.check_mem(&key);

    Json(ExistsResponse { key, remote, local })
}

/// Handler for POST /incr/:key
///
/// The body is optional; without one the counter is incremented by 1.
pub async fn incr_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Option<Json<IncrRequest>>,
) -> Result<Json<IncrResponse>> {
    check_key(&key)?;
    let delta = body.and_then(|Json(req)| req.delta).unwrap_or(1);
    let value = state.cache.incr_by(&key, delta).await?;

    Ok(Json(IncrResponse { key, value }))
}

/// Handler for DELETE /scan/:pattern
///
/// A partial failure answers with the error and the number of keys already deleted.
pub async fn scan_delete_handler(
    State(state): State<AppState>,
    Path(pattern): Path<String>,
) -> Result<Json<ScanDeleteResponse>> {
    check_key(&pattern)?;
    let deleted = state.cache.scan_delete(&pattern).await?;

    Ok(Json(ScanDeleteResponse { pattern, deleted }))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.cache.stats()))
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let reachable = state.cache.ping().await.is_ok();
    Json(HealthResponse::new(reachable, state.cache.mode()))
}
