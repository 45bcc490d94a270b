//! Cache configuration.
//!
//! The two switches that decide whether components cache at all (`enabled`
//! and the presence of a store) plus the store's capacity backstop.

use std::{num::NonZeroUsize, time::Duration};

use serde::Deserialize;

const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false every cache entry point runs its compute block directly.
    pub enabled: bool,
    /// Upper bound on stored entries; `0` disables the LRU bound.
    pub max_entries: usize,
    /// TTL applied when a caller does not pass one. `None` never expires.
    pub default_ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_MAX_ENTRIES,
            default_ttl: None,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            max_entries: settings.max_entries,
            default_ttl: settings.default_ttl,
        }
    }
}

impl CacheConfig {
    /// Capacity for the LRU store, or `None` when unbounded.
    pub fn capacity(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.max_entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_entries, 10_000);
        assert!(config.default_ttl.is_none());
    }

    #[test]
    fn zero_capacity_means_unbounded() {
        let config = CacheConfig {
            max_entries: 0,
            ..Default::default()
        };
        assert!(config.capacity().is_none());
    }
}
