use std::sync::Arc;

use oc_cache::CacheManager;
use oc_domain::config::Config;
use oc_pipeline::{CatalogRegistry, Orchestrator};

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub cache: Arc<CacheManager>,
    pub catalog: Arc<CatalogRegistry>,
    /// SHA-256 hash of the cache-API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}
