use std::collections::HashMap;
use std::sync::Arc;

use super::sites::{KidsVillageAdapter, OpenGraphAdapter};
use super::traits::SiteAdapter;
use crate::config::SiteConfig;
use crate::utils::error::AppError;

pub type SiteAdapterRef = Arc<dyn SiteAdapter>;

/// Name-indexed set of site adapters.
#[derive(Clone, Default)]
pub struct SiteRegistry {
    adapters: HashMap<String, SiteAdapterRef>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in adapter, configured from `site`.
    pub fn with_defaults(site: &SiteConfig) -> Result<Self, AppError> {
        let mut registry = Self::new();
        registry.register(Arc::new(KidsVillageAdapter::new(site)?));
        registry.register(Arc::new(OpenGraphAdapter::new()?));
        Ok(registry)
    }

    /// Register an adapter, replacing any previous one with the same name
    pub fn register(&mut self, adapter: SiteAdapterRef) {
        let name = adapter.name().to_string();
        if self.adapters.insert(name.clone(), adapter).is_some() {
            tracing::debug!(adapter = %name, "replaced site adapter");
        }
    }

    pub fn get(&self, name: &str) -> Result<SiteAdapterRef, AppError> {
        self.adapters.get(name).cloned().ok_or_else(|| {
            AppError::PluginError(format!(
                "site adapter '{}' not found (available: {})",
                name,
                self.names().join(", ")
            ))
        })
    }

    /// Sorted adapter names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}
