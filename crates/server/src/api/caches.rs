//! # Caches API
//!
//! Read-only view of the cache manager's state.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::ApiError;
use crate::SharedState;

#[derive(Debug, Serialize)]
pub struct CacheStatus {
    pub version: String,
    pub phase: String,
    pub primary: String,
    pub font_cache: String,
    pub assets: usize,
    pub caches: Vec<String>,
}

pub fn cache_routes() -> Router<SharedState> {
    Router::new().route("/", get(get_status))
}

async fn get_status(State(state): State<SharedState>) -> Result<Json<CacheStatus>, ApiError> {
    let manager = &state.manager;
    let caches = manager
        .storage()
        .keys()
        .await?
        .into_iter()
        .map(|name| name.to_string())
        .collect();

    Ok(Json(CacheStatus {
        version: manager.version().to_string(),
        phase: format!("{:?}", manager.phase()).to_lowercase(),
        primary: manager.primary_cache().to_string(),
        font_cache: manager.font_cache().to_string(),
        assets: manager.assets().len(),
        caches,
    }))
}
