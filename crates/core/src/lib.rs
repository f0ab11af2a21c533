//! # Harbor Core
//!
//! Offline-first asset caching and reactive local storage for Harbor.
//!
//! ## Architecture
//!
//! - `cache/` - Versioned asset cache manager (install, activate, serve) and the
//!   cache storage / fetcher ports it runs against
//! - `store/` - Reactive key-value store over a shared storage area, plus the JSON
//!   projection layer
//! - `config` - Cache naming, allow/deny lists and build mode
//! - `db` - Unified SQLite database backing persistent caches and storage
//!
//! ## Usage
//!
//! ```rust,ignore
//! use harbor_core::cache::{AssetManifest, CacheManager, HttpFetcher, MemoryCacheStorage};
//! use harbor_core::HarborConfig;
//!
//! let manifest = AssetManifest::load("manifest.json")?;
//! let manager = CacheManager::new(config, manifest, origin, storage, fetcher);
//! manager.install().await?;
//! manager.activate().await?;
//! let outcome = manager.handle_fetch(&request).await?;
//! ```

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod store;

pub use config::HarborConfig;
pub use db::HarborDb;
pub use error::{CacheError, JsonStoreError, StoreError};
