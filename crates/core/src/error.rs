//! # Errors
//!
//! Typed errors surfaced by the cache manager and the reactive store.

use thiserror::Error;

/// Errors produced by the cache manager and its storage/fetcher ports
#[derive(Debug, Error)]
pub enum CacheError {
    /// The network request itself failed (offline, DNS, connection reset...)
    #[error("fetch of {url} failed: {message}")]
    Fetch { url: String, message: String },

    /// An asset responded with a non-success status while being pre-cached
    #[error("asset {url} responded with status {status}")]
    BadStatus { url: String, status: u16 },

    /// The cache backend failed
    #[error("cache storage error: {0}")]
    Storage(String),

    /// A lifecycle step was invoked out of order
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// A request URL could not be parsed or resolved
    #[error("invalid url {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

impl CacheError {
    /// Build a storage error from anything displayable
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    /// Whether the error is a network-level failure
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }
}

/// Errors from a storage backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Errors from the JSON projection layer
#[derive(Debug, Error)]
pub enum JsonStoreError {
    /// The raw value is absent and no default is configured
    #[error("no value stored for key {0}")]
    Missing(String),

    /// The raw value is present but is not valid JSON for the target type
    #[error("malformed value for key {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The value could not be serialized
    #[error("failed to encode value for key {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
