//! Bootstrap-owned runtime objects.
//!
//! Everything shared between requests (the store, the cache client, the
//! component registry, the warmer and the reactive handler) is built once in
//! [`AppContext::init`] and handed out by reference. There is no module-level
//! state.

use std::sync::Arc;

use tracing::info;

use crate::{
    cache::{CacheClient, CacheConfig, CacheStore, MemoryStore, StoreStats},
    config::Settings,
    infra::cache_warmer::{CacheWarmer, WarmReport},
    presentation::components::{Counter, demo_components},
    reactive::{ComponentRegistry, ReactiveConfig, ReactiveHandler, SharedComponent},
};

use super::error::AppError;

pub const DEMO_COUNTER_ID: &str = "counter";

#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<MemoryStore>,
    pub cache: CacheClient,
    pub registry: Arc<ComponentRegistry>,
    pub warmer: Arc<CacheWarmer>,
    pub handler: Arc<ReactiveHandler>,
    pub counter: SharedComponent,
    pub settings: Arc<Settings>,
}

impl AppContext {
    pub fn init(settings: &Settings) -> Result<Self, AppError> {
        let cache_config = CacheConfig::from(&settings.cache);
        let store = Arc::new(MemoryStore::new(&cache_config));
        let shared_store: Arc<dyn CacheStore> = store.clone();
        let cache = CacheClient::new(shared_store, &cache_config);

        let registry = Arc::new(ComponentRegistry::new());
        let counter = registry.register_component(Counter::new(DEMO_COUNTER_ID, "Clicks"))?;

        let warmer = Arc::new(CacheWarmer::new(cache.clone()));
        warmer.register_all(demo_components(&cache));

        let handler = Arc::new(ReactiveHandler::new(
            ReactiveConfig::from(&settings.reactive),
            registry.clone(),
        ));

        info!(
            target: "tessera::bootstrap",
            cache_enabled = cache_config.enabled,
            max_entries = cache_config.max_entries,
            components = registry.registered_components(),
            warm_targets = warmer.len(),
            "application context initialized"
        );

        Ok(Self {
            store,
            cache,
            registry,
            warmer,
            handler,
            counter,
            settings: Arc::new(settings.clone()),
        })
    }

    /// Warm the registered components using the configured batch size.
    pub async fn warm(&self) -> WarmReport {
        let warmer = &self.settings.warmer;
        self.warmer
            .warm_all_concurrent(warmer.batch_size.get(), warmer.ttl)
            .await
    }

    pub fn store_stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Close live sessions and drop every registered component and cache entry.
    pub async fn shutdown(&self) {
        self.handler.shutdown().await;
        for id in self.registry.ids() {
            self.registry.unregister_component(&id);
        }
        self.store.clear();
        info!(target: "tessera::bootstrap", "application context shut down");
    }
}
