//! Component render cache.
//!
//! - [`CacheStore`] / [`MemoryStore`]: TTL key/value storage with lazy expiry
//! - [`CacheClient`]: per-component policy (plain, dependency-aware, warm)
//! - [`keys`]: default and composite key derivation
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! max_entries = 10000
//! default_ttl_seconds = 300
//! ```

mod client;
mod config;
pub mod keys;
pub(crate) mod lock;
mod store;

pub use client::CacheClient;
pub use config::CacheConfig;
pub use store::{CacheEntry, CacheStore, Compute, MemoryStore, StoreStats};
