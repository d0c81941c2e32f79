//! Asset context provider: the cached, read-only view over the Asset
//! service.
//!
//! Hydration goes through the two-tier asset cache (in-process L1, Redis
//! L2). The cache key carries the asset's opaque version token, so a
//! version bump from the Asset service strands the old entry and the next
//! read fetches fresh. Failures are recoverable — callers annotate the gap
//! and continue.

use std::collections::HashMap;
use std::sync::Arc;

use oc_cache::keys::{cache_key, Namespace};
use oc_cache::CacheManager;
use oc_domain::artifact::AssetContext;
use oc_domain::cancel::CancelToken;
use oc_domain::error::Result;
use oc_upstream::AssetClient;
use parking_lot::Mutex;

pub struct AssetContextProvider {
    client: AssetClient,
    cache: Arc<CacheManager>,
    /// Last version token seen per asset id; keys new lookups.
    versions: Mutex<HashMap<String, String>>,
}

impl AssetContextProvider {
    pub fn new(client: AssetClient, cache: Arc<CacheManager>) -> Self {
        Self {
            client,
            cache,
            versions: Mutex::new(HashMap::new()),
        }
    }

    fn asset_key(&self, asset_id: &str) -> String {
        let versions = self.versions.lock();
        let version = versions.get(asset_id).map(String::as_str).unwrap_or("-");
        cache_key(Namespace::Asset, &format!("{asset_id}@{version}"))
    }

    /// Hydrate one asset id, via cache when possible.
    pub async fn hydrate(&self, asset_id: &str, cancel: &CancelToken) -> Result<AssetContext> {
        let key = self.asset_key(asset_id);
        if let Some(value) = self.cache.get(Namespace::Asset, &key).await {
            if let Ok(ctx) = serde_json::from_value::<AssetContext>(value) {
                return Ok(ctx);
            }
        }

        let ctx = self.client.get_asset(asset_id, cancel).await?;
        self.versions
            .lock()
            .insert(asset_id.to_string(), ctx.version.clone());

        cancel.ensure_active()?;
        let fresh_key = self.asset_key(asset_id);
        if let Ok(value) = serde_json::to_value(&ctx) {
            self.cache.set(Namespace::Asset, &fresh_key, &value).await;
        }
        Ok(ctx)
    }

    /// Find assets matching a filter. Result sets are cached under the
    /// canonical filter text.
    pub async fn find(&self, filter: &str, cancel: &CancelToken) -> Result<Vec<AssetContext>> {
        let canonical = oc_cache::keys::canonicalize_text(filter);
        let key = cache_key(Namespace::Asset, &format!("filter:{canonical}"));
        if let Some(value) = self.cache.get(Namespace::Asset, &key).await {
            if let Ok(list) = serde_json::from_value::<Vec<AssetContext>>(value) {
                return Ok(list);
            }
        }

        let list = self.client.find_assets(filter, cancel).await?;
        for ctx in &list {
            self.versions
                .lock()
                .insert(ctx.asset_id.clone(), ctx.version.clone());
        }

        cancel.ensure_active()?;
        if let Ok(value) = serde_json::to_value(&list) {
            self.cache.set(Namespace::Asset, &key, &value).await;
        }
        Ok(list)
    }

    /// Version tokens of all hydrated assets, sorted; part of the Stage C
    /// cache key so plans don't outlive asset changes.
    pub fn version_tokens(contexts: &[AssetContext]) -> Vec<String> {
        let mut tokens: Vec<String> = contexts
            .iter()
            .map(|c| format!("{}@{}", c.asset_id, c.version))
            .collect();
        tokens.sort();
        tokens
    }

    /// Compact one-line digest of hydrated assets for prompt embedding.
    pub fn digest(contexts: &[AssetContext]) -> String {
        if contexts.is_empty() {
            return "none".into();
        }
        contexts
            .iter()
            .map(|c| {
                let attrs: Vec<String> = c
                    .attributes
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                format!(
                    "[asset:{}] type={} env={} {}",
                    c.asset_id,
                    c.asset_type,
                    c.environment,
                    attrs.join(" ")
                )
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn ctx(id: &str, version: &str) -> AssetContext {
        AssetContext {
            asset_id: id.into(),
            asset_type: "server".into(),
            environment: "production".into(),
            attributes: BTreeMap::from([("os".to_string(), "linux".to_string())]),
            version: version.into(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn digest_is_compact_and_citable() {
        let digest = AssetContextProvider::digest(&[ctx("srv-001", "v1")]);
        assert!(digest.contains("[asset:srv-001]"));
        assert!(digest.contains("env=production"));
        assert!(digest.contains("os=linux"));
        assert_eq!(AssetContextProvider::digest(&[]), "none");
    }

    #[test]
    fn version_tokens_sorted() {
        let tokens =
            AssetContextProvider::version_tokens(&[ctx("b", "v2"), ctx("a", "v9")]);
        assert_eq!(tokens, vec!["a@v9", "b@v2"]);
    }
}
