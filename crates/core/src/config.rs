//! # Harbor Configuration
//!
//! Cache naming, request allow/deny lists and build mode for the cache manager.
//! Values come from `HARBOR_*` environment variables, falling back to production defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default prefix for the per-version primary cache
pub const DEFAULT_CACHE_PREFIX: &str = "cache-";
/// Default name of the long-lived font cache
pub const DEFAULT_FONT_CACHE: &str = "google-fonts";
/// Default offline fallback page
pub const DEFAULT_FALLBACK: &str = "/404.html";
/// Default path prefix of immutable build output
pub const DEFAULT_IMMUTABLE_PREFIX: &str = "/lib/immutable/";

/// Configuration for the cache manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarborConfig {
    /// Prefix of the primary cache name (`{prefix}{version}`)
    pub cache_prefix: String,
    /// Name of the font cache, kept across deployments
    pub font_cache: String,
    /// Path served for unknown same-origin requests in production builds
    pub fallback: String,
    /// Same-origin paths that must never be answered from the cache
    pub uncacheable: BTreeSet<String>,
    /// Cross-origin font providers proxied through the font cache
    pub font_origins: BTreeSet<String>,
    /// Assets under this prefix are fetched bypassing the HTTP cache during install
    pub immutable_prefix: String,
    /// Development build: no offline fallback
    pub dev: bool,
}

impl Default for HarborConfig {
    fn default() -> Self {
        Self {
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            font_cache: DEFAULT_FONT_CACHE.to_string(),
            fallback: DEFAULT_FALLBACK.to_string(),
            uncacheable: ["/_app/version.json", "/_app/env.js"]
                .into_iter()
                .map(String::from)
                .collect(),
            font_origins: ["https://fonts.gstatic.com", "https://fonts.googleapis.com"]
                .into_iter()
                .map(String::from)
                .collect(),
            immutable_prefix: DEFAULT_IMMUTABLE_PREFIX.to_string(),
            dev: false,
        }
    }
}

impl HarborConfig {
    /// Build a configuration from `HARBOR_*` environment variables
    ///
    /// - `HARBOR_CACHE_PREFIX`, `HARBOR_FONT_CACHE`, `HARBOR_FALLBACK`,
    ///   `HARBOR_IMMUTABLE_PREFIX` - plain strings
    /// - `HARBOR_UNCACHEABLE`, `HARBOR_FONT_ORIGINS` - comma separated lists
    /// - `HARBOR_DEV` - `1`/`true` enables development mode
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(prefix) = lookup("HARBOR_CACHE_PREFIX") {
            config.cache_prefix = prefix;
        }
        if let Some(font_cache) = lookup("HARBOR_FONT_CACHE") {
            config.font_cache = font_cache;
        }
        if let Some(fallback) = lookup("HARBOR_FALLBACK") {
            config.fallback = fallback;
        }
        if let Some(prefix) = lookup("HARBOR_IMMUTABLE_PREFIX") {
            config.immutable_prefix = prefix;
        }
        if let Some(list) = lookup("HARBOR_UNCACHEABLE") {
            config.uncacheable = split_list(&list);
        }
        if let Some(list) = lookup("HARBOR_FONT_ORIGINS") {
            config.font_origins = split_list(&list)
                .into_iter()
                .map(|origin| origin.trim_end_matches('/').to_string())
                .collect();
        }
        if let Some(dev) = lookup("HARBOR_DEV") {
            config.dev = matches!(dev.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        config
    }

    /// Whether `origin` (scheme://host[:port]) is an allow-listed font provider
    pub fn is_font_origin(&self, origin: &str) -> bool {
        self.font_origins.contains(origin)
    }

    /// Whether `path` must always go to the network
    pub fn is_uncacheable(&self, path: &str) -> bool {
        self.uncacheable.contains(path)
    }
}

fn split_list(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_defaults() {
        let config = HarborConfig::default();
        assert_eq!(config.cache_prefix, "cache-");
        assert_eq!(config.font_cache, "google-fonts");
        assert_eq!(config.fallback, "/404.html");
        assert!(config.is_uncacheable("/_app/version.json"));
        assert!(config.is_font_origin("https://fonts.gstatic.com"));
        assert!(!config.dev);
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("HARBOR_FONT_ORIGINS", "https://fonts.example.com/, https://cdn.example.com"),
            ("HARBOR_UNCACHEABLE", "/health,,/version"),
            ("HARBOR_DEV", "true"),
            ("HARBOR_FALLBACK", "/offline.html"),
        ]
        .into_iter()
        .collect();

        let config = HarborConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert!(config.dev);
        assert_eq!(config.fallback, "/offline.html");
        assert!(config.is_font_origin("https://fonts.example.com"));
        assert!(config.is_font_origin("https://cdn.example.com"));
        assert!(!config.is_font_origin("https://fonts.gstatic.com"));
        assert_eq!(config.uncacheable.len(), 2);
        assert_eq!(config.cache_prefix, "cache-");
    }
}
