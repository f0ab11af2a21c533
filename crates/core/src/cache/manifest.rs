//! # Asset Manifest
//!
//! Build-time list of assets to pre-cache, plus the deployment version token.
//!
//! ```json
//! {
//!   "version": "1700000000000",
//!   "build": ["/lib/immutable/entry/start.js"],
//!   "files": ["/favicon.png"],
//!   "prerendered": ["/about"]
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Build output description produced by the bundler
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AssetManifest {
    /// Deployment version token, names the primary cache
    pub version: String,
    /// Application bundle files
    #[serde(default)]
    pub build: Vec<String>,
    /// Everything in the static directory
    #[serde(default)]
    pub files: Vec<String>,
    /// Pre-rendered pages
    #[serde(default)]
    pub prerendered: Vec<String>,
}

impl AssetManifest {
    /// Load a manifest from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read asset manifest: {:?}", path))?;
        Self::from_json(&raw).with_context(|| format!("Invalid asset manifest: {:?}", path))
    }

    /// Parse a manifest from a JSON string
    pub fn from_json(raw: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(raw)?;
        if manifest.version.trim().is_empty() {
            anyhow::bail!("asset manifest has an empty version");
        }
        Ok(manifest)
    }

    /// The set of paths to pre-cache, ending with `fallback`
    pub fn asset_set(&self, fallback: &str) -> AssetSet {
        AssetSet::new(
            self.build
                .iter()
                .chain(&self.files)
                .chain(&self.prerendered)
                .map(String::as_str)
                .chain(std::iter::once(fallback)),
        )
    }
}

/// Immutable, ordered, de-duplicated set of absolute asset paths
#[derive(Debug, Clone, Default)]
pub struct AssetSet {
    ordered: Vec<String>,
    index: HashSet<String>,
}

impl AssetSet {
    pub fn new<'a>(paths: impl IntoIterator<Item = &'a str>) -> Self {
        let mut set = Self::default();
        for path in paths {
            if set.index.insert(path.to_string()) {
                set.ordered.push(path.to_string());
            }
        }
        set
    }

    /// Exact membership test on a URL path
    pub fn contains(&self, path: &str) -> bool {
        self.index.contains(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_set_order_and_fallback() {
        let manifest = AssetManifest::from_json(
            r#"{
                "version": "42",
                "build": ["/lib/immutable/app.js", "/lib/version.json"],
                "files": ["/favicon.png", "/lib/immutable/app.js"],
                "prerendered": ["/about"]
            }"#,
        )
        .unwrap();

        let assets = manifest.asset_set("/404.html");
        let paths: Vec<&str> = assets.iter().collect();
        assert_eq!(
            paths,
            vec![
                "/lib/immutable/app.js",
                "/lib/version.json",
                "/favicon.png",
                "/about",
                "/404.html"
            ]
        );
        assert!(assets.contains("/404.html"));
        assert!(!assets.contains("/about/"));
    }

    #[test]
    fn test_manifest_requires_version() {
        assert!(AssetManifest::from_json(r#"{"version": "  "}"#).is_err());
        assert!(AssetManifest::from_json("not json").is_err());

        let minimal = AssetManifest::from_json(r#"{"version": "v1"}"#).unwrap();
        assert_eq!(minimal.asset_set("/404.html").len(), 1);
    }

    #[test]
    fn test_manifest_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, r#"{"version": "v7", "files": ["/robots.txt"]}"#).unwrap();

        let manifest = AssetManifest::load(&path).unwrap();
        assert_eq!(manifest.version, "v7");
        assert_eq!(manifest.files, vec!["/robots.txt".to_string()]);
    }
}
