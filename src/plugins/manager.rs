use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::adapters::{HtmlCatalogAdapter, JsonCatalogAdapter, JsonProfile, SelectorProfile};
use super::traits::SourceAdapter;
use crate::models::Store;
use crate::scraper::WebScraper;
use crate::utils::error::AppError;

pub type SourceAdapterRef = Arc<dyn SourceAdapter>;

/// Maps a store's adapter identifier to its implementation.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: Arc<RwLock<HashMap<String, SourceAdapterRef>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register an adapter under its own `adapter_type`. Replaces any previous one.
    pub async fn register(&self, adapter: SourceAdapterRef) {
        let adapter_type = adapter.adapter_type().to_string();
        tracing::debug!(adapter = %adapter_type, "Registering source adapter");

        let mut adapters = self.adapters.write().await;
        adapters.insert(adapter_type, adapter);
    }

    pub async fn has_adapter(&self, adapter_type: &str) -> bool {
        let adapters = self.adapters.read().await;
        adapters.contains_key(adapter_type)
    }

    pub async fn list_adapter_types(&self) -> Vec<String> {
        let adapters = self.adapters.read().await;
        let mut types: Vec<String> = adapters.keys().cloned().collect();
        types.sort();
        types
    }

    pub async fn get(&self, adapter_type: &str) -> Option<SourceAdapterRef> {
        let adapters = self.adapters.read().await;
        adapters.get(adapter_type).cloned()
    }

    pub async fn for_store(&self, store: &Store) -> Result<SourceAdapterRef, AppError> {
        self.get(&store.adapter).await.ok_or_else(|| AppError::Adapter {
            adapter: store.adapter.clone(),
            message: format!("no adapter registered for store '{}'", store.name),
        })
    }

    /// Register the built-in HTML and JSON catalog adapters.
    pub async fn initialize_default_adapters(&self, scraper: &WebScraper) -> Result<(), AppError> {
        for profile in SelectorProfile::defaults() {
            let adapter = HtmlCatalogAdapter::new(profile, scraper.clone())?;
            self.register(Arc::new(adapter)).await;
        }
        for profile in JsonProfile::defaults() {
            self.register(Arc::new(JsonCatalogAdapter::new(profile, scraper.clone())))
                .await;
        }
        Ok(())
    }

    /// Probes every store concurrently; a store without an adapter is unhealthy.
    pub async fn health_check_all(&self, stores: &[Store]) -> Vec<(Store, bool)> {
        let probes = stores.iter().map(|store| async move {
            let healthy = match self.get(&store.adapter).await {
                Some(adapter) => adapter.health_check(store).await,
                None => {
                    tracing::warn!(store_id = store.id, adapter = %store.adapter, "No adapter registered");
                    false
                }
            };
            (store.clone(), healthy)
        });
        futures::future::join_all(probes).await
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
