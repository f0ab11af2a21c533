//! # Requests and Responses
//!
//! Transport-neutral request/response types shared by the cache manager,
//! the cache storage backends and the fetcher.

use crate::error::CacheError;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

/// How an outgoing fetch treats intermediate HTTP caches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Use normal HTTP caching semantics
    #[default]
    Default,
    /// Bypass intermediate caches and revalidate with the origin
    Reload,
}

/// An intercepted or outgoing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub cache_mode: CacheMode,
}

impl FetchRequest {
    /// A plain GET request
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            cache_mode: CacheMode::Default,
        }
    }

    /// Parse `url` and build a GET request
    pub fn parse(url: &str) -> Result<Self, CacheError> {
        Url::parse(url)
            .map(Self::get)
            .map_err(|e| CacheError::InvalidUrl {
                url: url.to_string(),
                message: e.to_string(),
            })
    }

    /// Change the method
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Change the cache mode
    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    /// Serialized origin (`scheme://host[:port]`)
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    /// Key under which a response to this request is cached
    pub fn cache_key(&self) -> String {
        cache_key(&self.url)
    }
}

/// Cache entries are keyed by the absolute URL without its fragment
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

/// A response body with status and headers, as stored in a cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Whether the status is in the 2xx range
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value matching `name`, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
