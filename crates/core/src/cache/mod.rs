//! # Cache Module
//!
//! Offline asset caching for a deployed web application.
//!
//! ## Architecture
//!
//! ```text
//!      AssetManifest (build output + version)
//!                    ↓
//!              CacheManager ──── Fetcher (HttpFetcher / network)
//!                    ↓
//!              CacheStorage
//!                    ↓
//!   SqliteCacheStorage (persistent) or MemoryCacheStorage
//! ```

pub mod fetcher;
pub mod manager;
pub mod manifest;
pub mod names;
pub mod request;
pub mod sqlite;
pub mod storage;

pub use fetcher::{Fetcher, HttpFetcher};
pub use manager::{CacheManager, InstallReport, Interception, Phase, Route};
pub use manifest::{AssetManifest, AssetSet};
pub use names::CacheName;
pub use request::{CacheMode, CachedResponse, FetchRequest};
pub use sqlite::SqliteCacheStorage;
pub use storage::{CacheStorage, MemoryCacheStorage};
