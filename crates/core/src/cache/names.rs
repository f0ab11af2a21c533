use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a cache in the cache storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheName(String);

impl CacheName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Primary cache for a deployment version: `{prefix}{version}`
    pub fn primary(prefix: &str, version: &str) -> Self {
        Self(format!("{}{}", prefix, version))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for CacheName {
    fn from(name: String) -> Self {
        Self(name)
    }
}
