//! # Storage API
//!
//! HTTP access to the reactive storage area. `/events` streams every change of
//! a key as Server-Sent Events, starting with its current value.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::Serialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;

use super::ApiError;
use crate::SharedState;

#[derive(Debug, Clone, Serialize)]
pub struct ValueResponse {
    pub key: String,
    pub value: Option<String>,
}

pub fn storage_routes() -> Router<SharedState> {
    Router::new()
        .route("/:key", get(get_value).put(put_value).delete(delete_value))
        .route("/:key/events", get(value_events))
}

async fn get_value(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Result<Json<ValueResponse>, ApiError> {
    let value = state.storage.get(&key)?;
    Ok(Json(ValueResponse { key, value }))
}

async fn put_value(
    State(state): State<SharedState>,
    Path(key): Path<String>,
    body: String,
) -> Result<StatusCode, ApiError> {
    state.storage.set(&key, Some(&body))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_value(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.storage.remove_item(&key)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn value_events(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (tx, rx) = mpsc::unbounded_channel::<Option<String>>();
    let subscription = state.storage.subscribe(&key, move |value| {
        // Receiver gone means the client disconnected; the stream drops the subscription
        let _ = tx.send(value.map(String::from));
    })?;

    // The subscription lives in the stream state and unsubscribes when the client leaves
    let stream = stream::unfold(
        (rx, subscription, key),
        |(mut rx, subscription, key)| async move {
            let timeout = tokio::time::timeout(Duration::from_secs(15), rx.recv()).await;

            match timeout {
                Ok(Some(value)) => {
                    let payload = ValueResponse {
                        key: key.clone(),
                        value,
                    };
                    let json = serde_json::to_string(&payload).unwrap_or_default();
                    Some((Ok(Event::default().data(json)), (rx, subscription, key)))
                }
                Ok(None) => None,
                Err(_) => Some((
                    Ok(Event::default().comment("heartbeat")),
                    (rx, subscription, key),
                )),
            }
        },
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
