//! Per-component caching policy.
//!
//! A [`CacheClient`] pairs an optional store with the `enabled` switch. Components
//! hold one and route their render path through it; when caching is disabled,
//! no store is configured, or the component reports itself non-cacheable, every
//! entry point falls through to the compute block.

use std::{fmt, sync::Arc, time::Duration};

use crate::domain::{component::Component, error::RenderError};

use super::{
    config::CacheConfig,
    keys,
    store::{CacheStore, Compute},
};

#[derive(Clone)]
pub struct CacheClient {
    store: Option<Arc<dyn CacheStore>>,
    enabled: bool,
    default_ttl: Option<Duration>,
}

impl CacheClient {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store: Some(store),
            enabled: config.enabled,
            default_ttl: config.default_ttl,
        }
    }

    /// Client without a store; every call computes directly.
    pub fn bypass() -> Self {
        Self {
            store: None,
            enabled: false,
            default_ttl: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.enabled && self.store.is_some()
    }

    pub fn store(&self) -> Option<&Arc<dyn CacheStore>> {
        self.store.as_ref()
    }

    fn active_store(&self, component: &dyn Component) -> Option<&dyn CacheStore> {
        if !self.enabled || !component.cacheable() {
            return None;
        }
        self.store.as_deref()
    }

    fn resolve_ttl(&self, ttl: Option<Duration>) -> Option<Duration> {
        ttl.or(self.default_ttl)
    }

    /// Serve `component`'s cached output, computing and storing it on a miss.
    pub fn cache<'a, F>(
        &self,
        component: &dyn Component,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<String, RenderError>
    where
        F: FnOnce() -> Result<String, RenderError> + 'a,
    {
        let Some(store) = self.active_store(component) else {
            return compute();
        };

        let compute: Compute<'a> = Box::new(compute);
        store.fetch(&component.cache_key(), self.resolve_ttl(ttl), compute)
    }

    /// Like [`CacheClient::cache`], keyed on `component` together with the keys
    /// of `dependencies`. The entry is independent of the plain cache key.
    pub fn cache_with_dependencies<'a, F>(
        &self,
        component: &dyn Component,
        dependencies: &[&dyn Component],
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<String, RenderError>
    where
        F: FnOnce() -> Result<String, RenderError> + 'a,
    {
        let Some(store) = self.active_store(component) else {
            return compute();
        };

        let key = dependency_key(component, dependencies);
        let compute: Compute<'a> = Box::new(compute);
        store.fetch(&key, self.resolve_ttl(ttl), compute)
    }

    /// Drop the entry under `component`'s plain cache key. Composite entries
    /// are left alone.
    pub fn invalidate_cache(&self, component: &dyn Component) -> bool {
        match self.store.as_deref() {
            Some(store) => store.delete(&component.cache_key()),
            None => false,
        }
    }

    /// Drop the composite entry for `component` and `dependencies`.
    pub fn invalidate_dependencies(
        &self,
        component: &dyn Component,
        dependencies: &[&dyn Component],
    ) -> bool {
        match self.store.as_deref() {
            Some(store) => store.delete(&dependency_key(component, dependencies)),
            None => false,
        }
    }

    /// Render `component`'s content and store it regardless of what is cached.
    pub fn warm_cache(
        &self,
        component: &dyn Component,
        ttl: Option<Duration>,
    ) -> Result<String, RenderError> {
        let html = component.render_content()?;
        if let Some(store) = self.active_store(component) {
            store.write(&component.cache_key(), html.clone(), self.resolve_ttl(ttl));
        }
        Ok(html)
    }

    /// Currently cached output for `component`, if any.
    pub fn cached(&self, component: &dyn Component) -> Option<String> {
        self.store.as_deref()?.read(&component.cache_key())
    }
}

impl fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheClient")
            .field("has_store", &self.store.is_some())
            .field("enabled", &self.enabled)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

fn dependency_key(component: &dyn Component, dependencies: &[&dyn Component]) -> String {
    keys::composite_key(
        &component.cache_key(),
        dependencies.iter().map(|dependency| dependency.cache_key()),
    )
}
