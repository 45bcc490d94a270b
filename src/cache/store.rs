//! Cache storage.
//!
//! Entries carry an optional absolute expiry. Expiration is evaluated lazily:
//! an expired entry is purged when it is next read, checked or counted, never by
//! a background sweep. The in-memory store additionally bounds its size with an
//! LRU so expired-but-unread entries cannot grow without limit.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use lru::LruCache;
use metrics::counter;
use serde::Serialize;
use tracing::debug;

use crate::domain::error::RenderError;

use super::config::CacheConfig;
use super::lock::{LockExt, LockSite};

const SOURCE: &str = "cache::store";

const METRIC_HIT: &str = "tessera_cache_hit_total";
const METRIC_MISS: &str = "tessera_cache_miss_total";
const METRIC_EXPIRED: &str = "tessera_cache_expired_total";
const METRIC_EVICT: &str = "tessera_cache_evict_total";
const METRIC_FETCH_SUPERSEDED: &str = "tessera_cache_fetch_superseded_total";

/// Compute block run by [`CacheStore::fetch`] on a miss.
pub type Compute<'a> = Box<dyn FnOnce() -> Result<String, RenderError> + 'a>;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: String,
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    pub fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Totals over unexpired entries only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub entries: usize,
    /// Sum of the byte lengths of stored values.
    pub size: usize,
}

/// Key/value store with per-entry TTL.
///
/// Every method is atomic with respect to other calls on the same store. A miss
/// is a normal `None`, never an error.
pub trait CacheStore: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;

    fn write(&self, key: &str, value: String, ttl: Option<Duration>);

    /// Returns whether an entry was removed.
    fn delete(&self, key: &str) -> bool;

    fn clear(&self);

    /// False for absent and for expired entries.
    fn exists(&self, key: &str) -> bool;

    fn stats(&self) -> StoreStats;

    /// Return the cached value, or run `compute` once, store its output and
    /// return it.
    ///
    /// `compute` runs without holding the store, so it may itself use the
    /// cache. Its output is stored only if nothing wrote, deleted or cleared
    /// `key` since the miss was observed; otherwise the value live at that
    /// point is returned and the computed one is discarded. A failing compute
    /// stores nothing.
    fn fetch(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: Compute<'_>,
    ) -> Result<String, RenderError>;
}

/// Misses on one key whose compute blocks are still running.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    fetches: usize,
    /// Bumped by every mutation of the key while fetches are outstanding.
    version: u64,
}

struct Shelf {
    entries: LruCache<String, CacheEntry>,
    in_flight: HashMap<String, InFlight>,
    next_version: u64,
}

impl Shelf {
    fn new(entries: LruCache<String, CacheEntry>) -> Self {
        Self {
            entries,
            in_flight: HashMap::new(),
            next_version: 0,
        }
    }

    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    /// Record a mutation of `key` for any fetch computing it.
    fn touch(&mut self, key: &str) {
        if self.in_flight.contains_key(key) {
            let version = self.bump();
            if let Some(flight) = self.in_flight.get_mut(key) {
                flight.version = version;
            }
        }
    }

    fn touch_all(&mut self) {
        let version = self.bump();
        for flight in self.in_flight.values_mut() {
            flight.version = version;
        }
    }

    fn begin_fetch(&mut self, key: &str) -> u64 {
        let flight = self.in_flight.entry(key.to_string()).or_insert(InFlight {
            fetches: 0,
            version: 0,
        });
        flight.fetches += 1;
        flight.version
    }

    /// Drop one outstanding fetch of `key`, returning whether the key is
    /// untouched since `observed`.
    fn end_fetch(&mut self, key: &str, observed: u64) -> bool {
        let Some(flight) = self.in_flight.get_mut(key) else {
            return false;
        };
        let untouched = flight.version == observed;
        flight.fetches -= 1;
        if flight.fetches == 0 {
            self.in_flight.remove(key);
        }
        untouched
    }

    /// Look up a live entry, purging it first if it has expired.
    fn live_entry(&mut self, key: &str) -> Option<&CacheEntry> {
        let expired = self.entries.peek(key)?.is_expired(Instant::now());
        if expired {
            self.entries.pop(key);
            counter!(METRIC_EXPIRED).increment(1);
            debug!(key, "purged expired cache entry");
            return None;
        }
        self.entries.get(key)
    }

    fn insert(&mut self, key: &str, value: String, ttl: Option<Duration>) {
        self.touch(key);
        if let Some((evicted, _)) = self.entries.push(key.to_string(), CacheEntry::new(value, ttl))
            && evicted != key
        {
            counter!(METRIC_EVICT).increment(1);
            debug!(evicted = %evicted, "evicted cache entry at capacity");
        }
    }
}

/// Releases a fetch's in-flight slot if its compute block fails or unwinds.
struct FetchTicket<'a> {
    store: &'a MemoryStore,
    key: &'a str,
    observed: u64,
    settled: bool,
}

impl Drop for FetchTicket<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.store
                .shelf
                .lock_at(LockSite::new(SOURCE, "abandon_fetch").key(self.key))
                .end_fetch(self.key, self.observed);
        }
    }
}

/// In-process reference store.
pub struct MemoryStore {
    shelf: Mutex<Shelf>,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        let entries = match config.capacity() {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self {
            shelf: Mutex::new(Shelf::new(entries)),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            shelf: Mutex::new(Shelf::new(LruCache::unbounded())),
        }
    }

    fn hit_or_reserve(&self, key: &str) -> Result<String, u64> {
        let mut shelf = self.shelf.lock_at(LockSite::new(SOURCE, "fetch").key(key));
        if let Some(entry) = shelf.live_entry(key) {
            counter!(METRIC_HIT).increment(1);
            return Ok(entry.value.clone());
        }
        counter!(METRIC_MISS).increment(1);
        Err(shelf.begin_fetch(key))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl CacheStore for MemoryStore {
    fn read(&self, key: &str) -> Option<String> {
        let mut shelf = self.shelf.lock_at(LockSite::new(SOURCE, "read").key(key));
        match shelf.live_entry(key) {
            Some(entry) => {
                counter!(METRIC_HIT).increment(1);
                Some(entry.value.clone())
            }
            None => {
                counter!(METRIC_MISS).increment(1);
                None
            }
        }
    }

    fn write(&self, key: &str, value: String, ttl: Option<Duration>) {
        self.shelf
            .lock_at(LockSite::new(SOURCE, "write").key(key))
            .insert(key, value, ttl);
    }

    fn delete(&self, key: &str) -> bool {
        let mut shelf = self.shelf.lock_at(LockSite::new(SOURCE, "delete").key(key));
        shelf.touch(key);
        shelf.entries.pop(key).is_some()
    }

    fn clear(&self) {
        let mut shelf = self.shelf.lock_at(LockSite::new(SOURCE, "clear"));
        shelf.touch_all();
        shelf.entries.clear();
    }

    fn exists(&self, key: &str) -> bool {
        let mut shelf = self.shelf.lock_at(LockSite::new(SOURCE, "exists").key(key));
        let expired = match shelf.entries.peek(key) {
            Some(entry) => entry.is_expired(Instant::now()),
            None => return false,
        };
        if expired {
            shelf.entries.pop(key);
            counter!(METRIC_EXPIRED).increment(1);
        }
        !expired
    }

    fn stats(&self) -> StoreStats {
        let mut shelf = self.shelf.lock_at(LockSite::new(SOURCE, "stats"));
        let now = Instant::now();

        let expired: Vec<String> = shelf
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            shelf.entries.pop(key);
        }
        if !expired.is_empty() {
            counter!(METRIC_EXPIRED).increment(expired.len() as u64);
        }

        StoreStats {
            entries: shelf.entries.len(),
            size: shelf.entries.iter().map(|(_, entry)| entry.value.len()).sum(),
        }
    }

    fn fetch(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: Compute<'_>,
    ) -> Result<String, RenderError> {
        let observed = match self.hit_or_reserve(key) {
            Ok(value) => return Ok(value),
            Err(observed) => observed,
        };
        let mut ticket = FetchTicket {
            store: self,
            key,
            observed,
            settled: false,
        };

        let value = compute()?;

        let mut shelf = self.shelf.lock_at(LockSite::new(SOURCE, "fetch_store").key(key));
        ticket.settled = true;
        if shelf.end_fetch(key, observed) {
            shelf.insert(key, value.clone(), ttl);
            return Ok(value);
        }

        counter!(METRIC_FETCH_SUPERSEDED).increment(1);
        debug!(key, "key changed during compute, keeping the live value");
        match shelf.live_entry(key) {
            Some(entry) => Ok(entry.value.clone()),
            None => Ok(value),
        }
    }
}
