//! Component model consumed by the cache and reactive layers.
//!
//! Markup generation itself lives behind [`Component::render_content`]; this
//! module only fixes identity, attributes, children and the cache contract.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::keys;

use super::error::RenderError;

/// Opaque, stable handle for a component instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh id with the given prefix, e.g. `counter-1f3a9c0d2b44`.
    pub fn generate(prefix: &str) -> Self {
        let suffix = &Uuid::new_v4().simple().to_string()[..12];
        Self(format!("{prefix}-{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Insertion-ordered attribute mapping.
///
/// Re-inserting an existing name replaces the value in place, so the original
/// position is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pairs: Vec<(String, String)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.pairs.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.pairs.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.pairs.iter().position(|(existing, _)| existing == name)?;
        Some(self.pairs.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Attributes
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attributes = Self::new();
        for (name, value) in iter {
            attributes.insert(name, value);
        }
        attributes
    }
}

/// A child node: either a nested component or a raw text fragment.
#[derive(Clone)]
pub enum Child {
    Component(Arc<dyn Component>),
    Text(String),
}

impl Child {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn component<C: Component + 'static>(component: C) -> Self {
        Self::Component(Arc::new(component))
    }

    pub fn render(&self) -> Result<String, RenderError> {
        match self {
            Child::Component(component) => component.render(),
            Child::Text(text) => Ok(text.clone()),
        }
    }
}

impl fmt::Debug for Child {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Child::Component(component) => f
                .debug_tuple("Component")
                .field(&component.id().as_str())
                .finish(),
            Child::Text(text) => f.debug_tuple("Text").field(text).finish(),
        }
    }
}

/// Renderable unit of markup.
pub trait Component: Send + Sync {
    fn id(&self) -> &ComponentId;

    /// Concrete type identifier, used for cache keys and warmer statistics.
    fn type_name(&self) -> &'static str;

    fn attributes(&self) -> &Attributes;

    fn children(&self) -> &[Child] {
        &[]
    }

    /// Compute markup without consulting any cache.
    fn render_content(&self) -> Result<String, RenderError>;

    /// Public render path. Components that hold a [`crate::cache::CacheClient`]
    /// override this to route through it.
    fn render(&self) -> Result<String, RenderError> {
        self.render_content()
    }

    /// Key under which this component's output is cached. Overrides are
    /// authoritative; the default digest is not consulted when overridden.
    fn cache_key(&self) -> String {
        keys::default_cache_key(self.type_name(), self.attributes())
    }

    fn cacheable(&self) -> bool {
        true
    }
}

/// Render every child in order and concatenate the output.
pub fn render_children(children: &[Child]) -> Result<String, RenderError> {
    let mut out = String::new();
    for child in children {
        out.push_str(&child.render()?);
    }
    Ok(out)
}
