//! # Cache Storage
//!
//! Named, content-addressable response caches. Mirrors the host's cache API:
//! open-by-name, match-by-request, put, delete-by-name and list-names.
//! Backends guarantee atomic per-entry writes; callers never add locking on top.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::names::CacheName;
use super::request::CachedResponse;
use crate::error::CacheError;

/// Storage of named response caches
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the cache if it does not exist yet
    async fn open(&self, name: &CacheName) -> Result<(), CacheError>;

    /// Whether a cache with this name exists
    async fn has(&self, name: &CacheName) -> Result<bool, CacheError>;

    /// Names of all existing caches, in creation order
    async fn keys(&self) -> Result<Vec<CacheName>, CacheError>;

    /// Delete a cache and all of its entries. Returns whether it existed.
    async fn delete(&self, name: &CacheName) -> Result<bool, CacheError>;

    /// Look up a stored response. A missing cache is treated as an empty one.
    async fn match_request(
        &self,
        name: &CacheName,
        key: &str,
    ) -> Result<Option<CachedResponse>, CacheError>;

    /// Store a response, replacing any previous entry for `key`.
    /// Creates the cache if needed.
    async fn put(
        &self,
        name: &CacheName,
        key: &str,
        response: CachedResponse,
    ) -> Result<(), CacheError>;

    /// Store a batch of responses: either every entry is committed or none is
    async fn put_all(
        &self,
        name: &CacheName,
        entries: Vec<(String, CachedResponse)>,
    ) -> Result<(), CacheError>;
}

/// In-process cache storage
#[derive(Default)]
pub struct MemoryCacheStorage {
    caches: Mutex<MemoryCaches>,
}

#[derive(Default)]
struct MemoryCaches {
    order: Vec<CacheName>,
    entries: HashMap<CacheName, BTreeMap<String, CachedResponse>>,
}

impl MemoryCaches {
    fn open(&mut self, name: &CacheName) -> &mut BTreeMap<String, CachedResponse> {
        if !self.entries.contains_key(name) {
            self.order.push(name.clone());
        }
        self.entries.entry(name.clone()).or_default()
    }
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryCaches>, CacheError> {
        self.caches
            .lock()
            .map_err(|e| CacheError::storage(format!("Lock error: {}", e)))
    }

    /// Number of entries in a cache (0 if the cache does not exist)
    pub fn entry_count(&self, name: &CacheName) -> usize {
        self.lock()
            .ok()
            .and_then(|caches| caches.entries.get(name).map(BTreeMap::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &CacheName) -> Result<(), CacheError> {
        self.lock()?.open(name);
        Ok(())
    }

    async fn has(&self, name: &CacheName) -> Result<bool, CacheError> {
        Ok(self.lock()?.entries.contains_key(name))
    }

    async fn keys(&self) -> Result<Vec<CacheName>, CacheError> {
        Ok(self.lock()?.order.clone())
    }

    async fn delete(&self, name: &CacheName) -> Result<bool, CacheError> {
        let mut caches = self.lock()?;
        caches.order.retain(|existing| existing != name);
        Ok(caches.entries.remove(name).is_some())
    }

    async fn match_request(
        &self,
        name: &CacheName,
        key: &str,
    ) -> Result<Option<CachedResponse>, CacheError> {
        Ok(self
            .lock()?
            .entries
            .get(name)
            .and_then(|cache| cache.get(key))
            .cloned())
    }

    async fn put(
        &self,
        name: &CacheName,
        key: &str,
        response: CachedResponse,
    ) -> Result<(), CacheError> {
        self.lock()?.open(name).insert(key.to_string(), response);
        Ok(())
    }

    async fn put_all(
        &self,
        name: &CacheName,
        entries: Vec<(String, CachedResponse)>,
    ) -> Result<(), CacheError> {
        // Single lock: the batch lands all at once
        let mut caches = self.lock()?;
        let cache = caches.open(name);
        cache.extend(entries);
        Ok(())
    }
}
