//! Tool catalog registry.
//!
//! Loads [`ToolCatalog`] declarations from TOML at startup and hands out
//! `Arc` snapshots. Hot reload parses the file and swaps the whole catalog
//! pointer — readers mid-request keep the snapshot they already took, and
//! entries are never mutated in place.

use std::path::Path;
use std::sync::Arc;

use oc_domain::error::{Error, Result};
use oc_domain::tool::ToolCatalog;
use parking_lot::RwLock;

#[derive(Debug)]
pub struct CatalogRegistry {
    current: RwLock<Arc<ToolCatalog>>,
}

impl CatalogRegistry {
    /// Load the catalog from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let catalog = read_catalog(path.as_ref())?;
        tracing::info!(
            tools = catalog.tools.len(),
            "tool catalog loaded"
        );
        Ok(Self {
            current: RwLock::new(Arc::new(catalog)),
        })
    }

    /// Wrap an already-built catalog (tests, embedded defaults).
    pub fn from_catalog(catalog: ToolCatalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    /// A point-in-time snapshot. Holders keep it for the whole request.
    pub fn snapshot(&self) -> Arc<ToolCatalog> {
        self.current.read().clone()
    }

    /// Re-read the file and atomically swap the catalog. A parse failure
    /// leaves the running catalog untouched.
    pub fn reload(&self, path: impl AsRef<Path>) -> Result<usize> {
        let catalog = read_catalog(path.as_ref())?;
        let count = catalog.tools.len();
        *self.current.write() = Arc::new(catalog);
        tracing::info!(tools = count, "tool catalog reloaded");
        Ok(count)
    }
}

fn read_catalog(path: &Path) -> Result<ToolCatalog> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read tool catalog {}: {e}", path.display())))?;
    toml::from_str(&raw)
        .map_err(|e| Error::Config(format!("invalid tool catalog {}: {e}", path.display())))
}
