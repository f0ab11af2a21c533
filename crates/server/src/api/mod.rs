//! # Harbor API
//!
//! Endpoints under `/_harbor`: cache inspection and the reactive storage area.

pub mod caches;
pub mod storage;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::Serialize;

use crate::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .nest("/caches", caches::cache_routes())
        .nest("/storage", storage::storage_routes())
}

#[derive(Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

/// Error returned by API handlers
pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self.0, "API request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse {
                success: false,
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}
