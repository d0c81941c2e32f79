//! Read-only client for the Asset service.
//!
//! Answers "hydrate this asset id" and "find assets matching filter".
//! Responses carry an opaque `version` token that becomes part of the
//! asset-context cache key, so a version change naturally invalidates
//! prior entries. Failures here are recoverable for the pipeline — callers
//! record the gap and proceed with degraded confidence.

use chrono::Utc;
use oc_domain::artifact::AssetContext;
use oc_domain::cancel::CancelToken;
use oc_domain::config::UpstreamConfig;
use oc_domain::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Wire format of one asset record.
#[derive(Debug, Deserialize)]
struct AssetRecord {
    id: String,
    #[serde(rename = "type", default)]
    asset_type: String,
    #[serde(default)]
    environment: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    version: String,
}

#[derive(Debug, Deserialize)]
struct AssetListResponse {
    #[serde(default)]
    assets: Vec<AssetRecord>,
}

impl AssetRecord {
    fn into_context(self) -> AssetContext {
        AssetContext {
            asset_id: self.id,
            asset_type: self.asset_type,
            environment: self.environment,
            attributes: self.attributes,
            version: self.version,
            fetched_at: Utc::now(),
        }
    }
}

/// Created once and reused; the underlying `reqwest::Client` pools
/// connections.
#[derive(Clone)]
pub struct AssetClient {
    http: reqwest::Client,
    base_url: String,
}

impl AssetClient {
    pub fn new(cfg: &UpstreamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: cfg.asset_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch a single asset by id.
    pub async fn get_asset(&self, asset_id: &str, cancel: &CancelToken) -> Result<AssetContext> {
        cancel.ensure_active()?;
        let url = format!("{}/assets/{}", self.base_url, urlencoding::encode(asset_id));
        let record: AssetRecord = self.fetch_json(&url, cancel).await?;
        Ok(record.into_context())
    }

    /// Find assets matching a filter expression, e.g. `environment=production`.
    pub async fn find_assets(
        &self,
        filter: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<AssetContext>> {
        cancel.ensure_active()?;
        let url = format!(
            "{}/assets?filter={}",
            self.base_url,
            urlencoding::encode(filter)
        );
        let list: AssetListResponse = self.fetch_json(&url, cancel).await?;
        Ok(list.assets.into_iter().map(AssetRecord::into_context).collect())
    }

    async fn fetch_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        cancel: &CancelToken,
    ) -> Result<T> {
        let resp = tokio::select! {
            r = self.http.get(url).send() => r,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        }
        .map_err(|e| Error::UpstreamUnavailable {
            service: "asset".into(),
            message: e.to_string(),
        })?;
        cancel.ensure_active()?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::UpstreamUnavailable {
                service: "asset".into(),
                message: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(Error::UpstreamUnavailable {
                service: "asset".into(),
                message: format!("HTTP {} - {}", status.as_u16(), body),
            });
        }
        serde_json::from_str(&body).map_err(|e| Error::UpstreamUnavailable {
            service: "asset".into(),
            message: format!("undecodable response: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_parses_and_converts() {
        let raw = r#"{
            "id": "srv-001",
            "type": "server",
            "environment": "production",
            "attributes": {"os": "linux", "cpu": "8"},
            "version": "v17"
        }"#;
        let record: AssetRecord = serde_json::from_str(raw).unwrap();
        let ctx = record.into_context();
        assert_eq!(ctx.asset_id, "srv-001");
        assert_eq!(ctx.environment, "production");
        assert_eq!(ctx.attributes["os"], "linux");
        assert_eq!(ctx.version, "v17");
    }

    #[test]
    fn record_tolerates_missing_optionals() {
        let record: AssetRecord = serde_json::from_str(r#"{"id": "x"}"#).unwrap();
        let ctx = record.into_context();
        assert_eq!(ctx.asset_id, "x");
        assert!(ctx.environment.is_empty());
        assert!(ctx.attributes.is_empty());
    }

    #[test]
    fn list_response_defaults_to_empty() {
        let list: AssetListResponse = serde_json::from_str("{}").unwrap();
        assert!(list.assets.is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_rejects_before_dispatch() {
        let client = AssetClient::new(&UpstreamConfig::default()).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = client.get_asset("srv-001", &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
