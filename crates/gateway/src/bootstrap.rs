//! Server bootstrap: validate config, connect the tiers, and assemble the
//! dependency-injected [`AppState`] every handler shares.

use std::sync::Arc;

use anyhow::Context;
use oc_cache::redis_tier::RedisTier;
use oc_cache::CacheManager;
use oc_domain::config::{Config, ConfigSeverity};
use oc_domain::tool::ToolCatalog;
use oc_llm::{HttpLlmBackend, LlmService};
use oc_pipeline::context::AssetContextProvider;
use oc_pipeline::{CatalogRegistry, Orchestrator};
use oc_upstream::{AssetClient, AutomationClient};

use crate::api::auth::token_hash_from_env;
use crate::state::AppState;

/// Log every config issue; fail startup when any error-severity issue
/// exists.
pub fn check_config(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors: Vec<_> = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .collect();
    if !errors.is_empty() {
        anyhow::bail!(
            "{} config error(s) — fix them or run `opsconductor config validate`",
            errors.len()
        );
    }
    Ok(())
}

/// Build the shared application state.
pub async fn build_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let redis = if config.cache.enabled && config.redis.enabled {
        RedisTier::connect(&config.redis.url).await
    } else {
        RedisTier::disconnected()
    };
    let cache = Arc::new(CacheManager::new(&config.cache, redis));

    let backend = Arc::new(
        HttpLlmBackend::from_config(&config.llm).context("building LLM backend")?,
    );
    let llm = Arc::new(LlmService::new(backend, &config.llm));

    let assets = Arc::new(AssetContextProvider::new(
        AssetClient::new(&config.upstream).context("building asset client")?,
        cache.clone(),
    ));
    let automation =
        AutomationClient::new(&config.upstream).context("building automation client")?;

    let catalog_path = std::path::Path::new(&config.catalog.path);
    let catalog = if catalog_path.exists() {
        Arc::new(CatalogRegistry::load(catalog_path).context("loading tool catalog")?)
    } else {
        tracing::warn!(
            path = %config.catalog.path,
            "tool catalog file not found — starting with an empty catalog"
        );
        Arc::new(CatalogRegistry::from_catalog(ToolCatalog::default()))
    };

    let orchestrator = Arc::new(Orchestrator::new(
        &config,
        llm,
        cache.clone(),
        assets,
        automation,
        catalog.clone(),
    ));

    let api_token_hash = token_hash_from_env(&config.server.api_token_env);

    Ok(AppState {
        config,
        orchestrator,
        cache,
        catalog,
        api_token_hash,
    })
}
