//! Connectionless component registry.
//!
//! The HTTP fallback has no session to remember components between requests,
//! so every component reachable that way is registered here. One registry is
//! built at bootstrap and shared by reference.

use std::sync::{Arc, Mutex};

use dashmap::{DashMap, mapref::entry::Entry};
use thiserror::Error;
use tracing::debug;

use crate::cache::lock::{LockExt, LockSite};
use crate::domain::{
    component::ComponentId,
    error::ActionTableError,
    reactive::{LiveComponent, Reactive},
};

const SOURCE: &str = "reactive::registry";

/// A registered component, shared between the registry and any sessions that
/// bound it.
pub type SharedComponent = Arc<Mutex<dyn LiveComponent>>;

pub fn share<C: Reactive>(component: C) -> SharedComponent {
    Arc::new(Mutex::new(component))
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("component `{component_id}` is already registered")]
    Duplicate { component_id: ComponentId },
    #[error("component `{component_id}` has an invalid action table: {source}")]
    InvalidActions {
        component_id: ComponentId,
        #[source]
        source: ActionTableError,
    },
}

#[derive(Default)]
pub struct ComponentRegistry {
    components: DashMap<ComponentId, SharedComponent>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared component after validating its action table.
    pub fn register(&self, component: SharedComponent) -> Result<ComponentId, RegistryError> {
        let (component_id, validation) = {
            let guard = component.lock_at(LockSite::new(SOURCE, "register"));
            (guard.id().clone(), guard.validate_actions())
        };

        if let Err(source) = validation {
            return Err(RegistryError::InvalidActions {
                component_id,
                source,
            });
        }

        match self.components.entry(component_id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate { component_id }),
            Entry::Vacant(slot) => {
                slot.insert(component);
                debug!(component_id = %component_id, "component registered");
                Ok(component_id)
            }
        }
    }

    /// Wrap and register a concrete component, returning the shared handle.
    pub fn register_component<C: Reactive>(
        &self,
        component: C,
    ) -> Result<SharedComponent, RegistryError> {
        let shared = share(component);
        self.register(shared.clone())?;
        Ok(shared)
    }

    pub fn unregister_component(&self, component_id: &ComponentId) -> Option<SharedComponent> {
        let removed = self.components.remove(component_id).map(|(_, c)| c);
        if removed.is_some() {
            debug!(component_id = %component_id, "component unregistered");
        }
        removed
    }

    pub fn get(&self, component_id: &ComponentId) -> Option<SharedComponent> {
        self.components
            .get(component_id)
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, component_id: &ComponentId) -> bool {
        self.components.contains_key(component_id)
    }

    pub fn registered_components(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn ids(&self) -> Vec<ComponentId> {
        let mut ids: Vec<ComponentId> = self
            .components
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn clear(&self) {
        self.components.clear();
    }
}
