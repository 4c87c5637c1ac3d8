//! Bundle registry: named, ordered lists of assets

use crate::cache::{AssetError, AssetRequest};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};
use url::Url;

/// Bundles whose asset list is their own list followed by another bundle's
pub const DEFAULT_ALIASES: &[(&str, &str)] =
    &[("ykm", "gwongzau-hc"), ("shandong-hc", "weihai-hc")];

/// One manifest entry: a bare URL or a request descriptor
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestAsset {
    Url(String),
    Request {
        url: String,
        #[serde(default = "default_method")]
        method: String,
    },
}

fn default_method() -> String {
    "GET".to_string()
}

/// Read-only mapping from bundle name to its asset requests
#[derive(Debug, Clone, Default)]
pub struct BundleRegistry {
    bundles: BTreeMap<String, Vec<AssetRequest>>,
    aliases: BTreeMap<String, String>,
}

impl BundleRegistry {
    /// Registry over already-resolved bundles, with the default aliases
    pub fn new(bundles: BTreeMap<String, Vec<AssetRequest>>) -> Self {
        let aliases = DEFAULT_ALIASES
            .iter()
            .map(|(name, extra)| (name.to_string(), extra.to_string()))
            .collect();
        Self { bundles, aliases }
    }

    /// Parse a JSON manifest, resolving relative URLs against `base`
    pub fn from_json(json: &str, base: &Url) -> Result<Self, AssetError> {
        let raw: BTreeMap<String, Vec<ManifestAsset>> = serde_json::from_str(json)?;

        let mut bundles = BTreeMap::new();
        for (name, assets) in raw {
            let mut requests = Vec::with_capacity(assets.len());
            for asset in assets {
                let (method, url) = match asset {
                    ManifestAsset::Url(url) => (default_method(), url),
                    ManifestAsset::Request { url, method } => (method, url),
                };
                let resolved = base
                    .join(&url)
                    .map_err(|e| AssetError::InvalidUrl(format!("{} in bundle {}: {}", url, name, e)))?;
                requests.push(AssetRequest::new(&method, resolved.as_str()));
            }
            bundles.insert(name, requests);
        }

        Ok(Self::new(bundles))
    }

    /// Load a JSON manifest from disk
    pub fn from_path<P: AsRef<Path>>(path: P, base: &Url) -> Result<Self, AssetError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let registry = Self::from_json(&json, base)?;
        info!(
            "Loaded {} bundles from {}",
            registry.len(),
            path.as_ref().display()
        );
        Ok(registry)
    }

    /// Make `name` resolve to its own list followed by `extra`'s list
    pub fn with_alias(mut self, name: &str, extra: &str) -> Self {
        self.aliases.insert(name.to_string(), extra.to_string());
        self
    }

    /// Every registered bundle name, in stable order
    pub fn names(&self) -> Vec<&str> {
        self.bundles.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bundles.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Ordered asset requests for a bundle.
    ///
    /// Aliases concatenate without deduplication. A name with no registered
    /// list is an `UnknownBundle` error; a missing secondary list of an alias
    /// contributes nothing.
    pub fn resolve(&self, name: &str) -> Result<Vec<AssetRequest>, AssetError> {
        let own = self
            .bundles
            .get(name)
            .ok_or_else(|| AssetError::UnknownBundle(name.to_string()))?;

        let mut assets = own.clone();
        if let Some(extra) = self.aliases.get(name) {
            match self.bundles.get(extra) {
                Some(extra_assets) => assets.extend(extra_assets.iter().cloned()),
                None => warn!("Bundle {} extends unknown bundle {}", name, extra),
            }
        }
        Ok(assets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://app.test/").unwrap()
    }

    fn registry() -> BundleRegistry {
        BundleRegistry::from_json(
            r#"{
                "ykm": ["/ykm/index.js", "/shared.css"],
                "gwongzau-hc": ["/gz/index.js", "/shared.css"],
                "shandong-hc": ["/sd/index.js"],
                "weihai-hc": ["/wh/index.js", "/wh/map.png"],
                "plain": ["/plain.js"]
            }"#,
            &base(),
        )
        .unwrap()
    }

    fn urls(requests: &[AssetRequest]) -> Vec<&str> {
        requests.iter().map(|r| r.url.as_str()).collect()
    }

    #[test]
    fn test_plain_bundle_resolves_directly() {
        let assets = registry().resolve("plain").unwrap();
        assert_eq!(urls(&assets), vec!["http://app.test/plain.js"]);
    }

    #[test]
    fn test_ykm_alias_concatenates_without_dedup() {
        let assets = registry().resolve("ykm").unwrap();
        assert_eq!(
            urls(&assets),
            vec![
                "http://app.test/ykm/index.js",
                "http://app.test/shared.css",
                "http://app.test/gz/index.js",
                "http://app.test/shared.css",
            ]
        );
    }

    #[test]
    fn test_shandong_alias_appends_weihai() {
        let assets = registry().resolve("shandong-hc").unwrap();
        assert_eq!(
            urls(&assets),
            vec![
                "http://app.test/sd/index.js",
                "http://app.test/wh/index.js",
                "http://app.test/wh/map.png",
            ]
        );
    }

    #[test]
    fn test_alias_target_alone_is_not_extended() {
        let assets = registry().resolve("gwongzau-hc").unwrap();
        assert_eq!(assets.len(), 2);
    }

    #[test]
    fn test_unknown_bundle_is_an_error() {
        let err = registry().resolve("missing").unwrap_err();
        assert!(matches!(err, AssetError::UnknownBundle(name) if name == "missing"));
    }

    #[test]
    fn test_alias_with_missing_secondary() {
        let registry = BundleRegistry::from_json(r#"{"ykm": ["/ykm.js"]}"#, &base()).unwrap();
        assert_eq!(urls(&registry.resolve("ykm").unwrap()), vec!["http://app.test/ykm.js"]);
    }

    #[test]
    fn test_request_descriptors_and_absolute_urls() {
        let registry = BundleRegistry::from_json(
            r#"{"mixed": [
                {"url": "/api/boot", "method": "post"},
                {"url": "data.json"},
                "https://cdn.test/lib.js"
            ]}"#,
            &Url::parse("http://app.test/sim/").unwrap(),
        )
        .unwrap();

        let assets = registry.resolve("mixed").unwrap();
        assert_eq!(assets[0], AssetRequest::new("POST", "http://app.test/api/boot"));
        assert_eq!(assets[1], AssetRequest::get("http://app.test/sim/data.json"));
        assert_eq!(assets[2], AssetRequest::get("https://cdn.test/lib.js"));
    }

    #[test]
    fn test_custom_alias() {
        let registry = registry().with_alias("plain", "weihai-hc");
        assert_eq!(registry.resolve("plain").unwrap().len(), 3);
    }

    #[test]
    fn test_names_are_sorted() {
        assert_eq!(
            registry().names(),
            vec!["gwongzau-hc", "plain", "shandong-hc", "weihai-hc", "ykm"]
        );
    }

    #[test]
    fn test_malformed_manifest() {
        assert!(BundleRegistry::from_json(r#"{"a": "/x.js"}"#, &base()).is_err());
        assert!(BundleRegistry::from_json(r#"{"a": [42]}"#, &base()).is_err());
    }
}
