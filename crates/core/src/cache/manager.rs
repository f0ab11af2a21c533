//! # Cache Manager
//!
//! Versioned asset cache with an offline fallback page, plus a network-first
//! proxy cache for third-party fonts.
//!
//! ## Lifecycle
//!
//! ```text
//! New --install()--> Installed --activate()--> Activated --handle_fetch()...
//! ```
//!
//! - `install` pre-caches every asset of the manifest into `{prefix}{version}`
//!   as one batch. Any failure fails the install and leaves the phase at `New`.
//! - `activate` deletes every cache except the primary and the font cache.
//! - `handle_fetch` routes intercepted requests once activated.

use futures::future::try_join_all;
use reqwest::{Method, Url};
use std::sync::{Arc, Mutex};

use super::fetcher::Fetcher;
use super::manifest::{AssetManifest, AssetSet};
use super::names::CacheName;
use super::request::{cache_key, CacheMode, CachedResponse, FetchRequest};
use super::storage::CacheStorage;
use crate::config::HarborConfig;
use crate::error::CacheError;

/// Lifecycle phase of the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not installed (or the last install failed)
    New,
    /// Assets are pre-cached, old caches not yet reclaimed
    Installed,
    /// Controlling requests
    Activated,
}

/// Routing decision for an intercepted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Not intercepted, left to the network
    PassThrough,
    /// Known build asset, served cache-only from the primary cache
    Asset(String),
    /// Unknown same-origin path, served the offline fallback page
    Fallback,
    /// Allow-listed font provider, network-first with cache fallback
    Font,
}

/// Outcome of intercepting a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    /// The request was not intercepted
    PassThrough,
    /// The request was answered
    Respond(CachedResponse),
    /// The request was intercepted but no cached response exists
    Missing,
}

/// Summary of a successful install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cache: CacheName,
    pub assets: usize,
}

/// Versioned asset cache manager
pub struct CacheManager {
    config: HarborConfig,
    version: String,
    assets: AssetSet,
    origin: Url,
    primary: CacheName,
    font_cache: CacheName,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    phase: Mutex<Phase>,
}

impl CacheManager {
    /// Create a manager for `manifest`, serving the site at `origin`
    pub fn new(
        config: HarborConfig,
        manifest: &AssetManifest,
        origin: Url,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let assets = manifest.asset_set(&config.fallback);
        let primary = CacheName::primary(&config.cache_prefix, &manifest.version);
        let font_cache = CacheName::new(config.font_cache.clone());

        Self {
            config,
            version: manifest.version.clone(),
            assets,
            origin,
            primary,
            font_cache,
            storage,
            fetcher,
            phase: Mutex::new(Phase::New),
        }
    }

    /// Name of the primary cache for this version
    pub fn primary_cache(&self) -> &CacheName {
        &self.primary
    }

    /// Name of the font cache
    pub fn font_cache(&self) -> &CacheName {
        &self.font_cache
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn config(&self) -> &HarborConfig {
        &self.config
    }

    pub fn assets(&self) -> &AssetSet {
        &self.assets
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.phase.lock().map(|phase| *phase).unwrap_or(Phase::New)
    }

    fn set_phase(&self, next: Phase) {
        if let Ok(mut phase) = self.phase.lock() {
            *phase = next;
        }
    }

    /// Absolute URL for a same-origin path
    fn asset_url(&self, path: &str) -> Result<Url, CacheError> {
        self.origin.join(path).map_err(|e| CacheError::InvalidUrl {
            url: path.to_string(),
            message: e.to_string(),
        })
    }

    /// Outgoing request used to pre-cache `path`
    fn install_request(&self, path: &str) -> Result<FetchRequest, CacheError> {
        let mode = if path.starts_with(&self.config.immutable_prefix) {
            CacheMode::Reload
        } else {
            CacheMode::Default
        };
        Ok(FetchRequest::get(self.asset_url(path)?).with_cache_mode(mode))
    }

    /// Pre-cache every asset into the primary cache
    ///
    /// All fetches must succeed with a 2xx status before anything is committed.
    pub async fn install(&self) -> Result<InstallReport, CacheError> {
        tracing::info!(
            cache = %self.primary,
            assets = self.assets.len(),
            "Installing asset cache"
        );

        let requests = self
            .assets
            .iter()
            .map(|path| self.install_request(path))
            .collect::<Result<Vec<_>, _>>()?;

        let fetches = requests.iter().map(|request| async move {
            let response = self.fetcher.fetch(request).await?;
            if !response.ok() {
                return Err(CacheError::BadStatus {
                    url: request.url.to_string(),
                    status: response.status,
                });
            }
            Ok((request.cache_key(), response))
        });

        let entries = match try_join_all(fetches).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(cache = %self.primary, error = %e, "Install failed");
                return Err(e);
            }
        };

        self.storage.open(&self.primary).await?;
        self.storage.put_all(&self.primary, entries).await?;
        self.set_phase(Phase::Installed);

        tracing::info!(cache = %self.primary, "Asset cache installed");

        Ok(InstallReport {
            cache: self.primary.clone(),
            assets: self.assets.len(),
        })
    }

    /// Delete every cache other than the primary and font caches
    ///
    /// Returns the names of the deleted caches.
    pub async fn activate(&self) -> Result<Vec<CacheName>, CacheError> {
        match self.phase() {
            Phase::New => {
                return Err(CacheError::Lifecycle(format!(
                    "cannot activate {} before a successful install",
                    self.primary
                )))
            }
            Phase::Installed | Phase::Activated => {}
        }

        let mut deleted = Vec::new();
        for name in self.storage.keys().await? {
            if name != self.primary && name != self.font_cache {
                self.storage.delete(&name).await?;
                deleted.push(name);
            }
        }

        self.set_phase(Phase::Activated);

        if deleted.is_empty() {
            tracing::info!(cache = %self.primary, "Activated");
        } else {
            tracing::info!(
                cache = %self.primary,
                deleted = ?deleted.iter().map(CacheName::as_str).collect::<Vec<_>>(),
                "Activated, removed stale caches"
            );
        }

        Ok(deleted)
    }

    /// Decide how an intercepted request is handled
    pub fn route(&self, request: &FetchRequest) -> Route {
        if request.method != Method::GET {
            return Route::PassThrough;
        }

        let origin = request.origin();
        if origin != self.origin.origin().ascii_serialization() {
            return if self.config.is_font_origin(&origin) {
                Route::Font
            } else {
                Route::PassThrough
            };
        }

        let path = request.url.path();
        if self.assets.contains(path) {
            Route::Asset(path.to_string())
        } else if !self.config.dev && !self.config.is_uncacheable(path) {
            Route::Fallback
        } else {
            Route::PassThrough
        }
    }

    /// Intercept a request
    ///
    /// Before activation nothing is intercepted. A font request fails only when
    /// the network fails and nothing was cached before.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<Interception, CacheError> {
        if self.phase() != Phase::Activated {
            return Ok(Interception::PassThrough);
        }

        let response = match self.route(request) {
            Route::PassThrough => return Ok(Interception::PassThrough),
            Route::Asset(path) => self.respond(&path).await?,
            Route::Fallback => {
                let fallback = self.config.fallback.clone();
                self.respond(&fallback).await?
            }
            Route::Font => Some(self.font_response(request).await?),
        };

        Ok(match response {
            Some(response) => Interception::Respond(response),
            None => Interception::Missing,
        })
    }

    /// Cache-only lookup of a same-origin path in the primary cache
    pub async fn respond(&self, path: &str) -> Result<Option<CachedResponse>, CacheError> {
        let key = cache_key(&self.asset_url(path)?);
        let hit = self.storage.match_request(&self.primary, &key).await?;
        if hit.is_none() {
            tracing::warn!(cache = %self.primary, path, "Asset missing from cache");
        }
        Ok(hit)
    }

    /// Network-first fetch through the font cache
    pub async fn font_response(&self, request: &FetchRequest) -> Result<CachedResponse, CacheError> {
        let key = request.cache_key();

        match self.fetcher.fetch(request).await {
            Ok(fresh) => {
                // Only a successful response may replace the last good copy
                if fresh.ok() {
                    self.storage
                        .put(&self.font_cache, &key, fresh.clone())
                        .await?;
                }
                Ok(fresh)
            }
            Err(e) => match self.storage.match_request(&self.font_cache, &key).await? {
                Some(cached) => {
                    tracing::debug!(url = %request.url, error = %e, "Font fetch failed, serving cached copy");
                    Ok(cached)
                }
                None => Err(e),
            },
        }
    }
}
