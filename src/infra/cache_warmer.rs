//! Bulk pre-population of component caches.

use std::{
    collections::BTreeMap,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use futures::future::join_all;
use metrics::{counter, histogram};
use serde::{
    Serialize, Serializer,
    ser::SerializeMap,
};
use tracing::{info, instrument, warn};

use crate::{
    cache::{
        CacheClient,
        lock::{LockSite, RwLockExt},
    },
    domain::component::{Component, ComponentId},
};

const SOURCE: &str = "infra::cache_warmer";
const METRIC_WARM_MS: &str = "tessera_warm_ms";
const METRIC_WARM_FAILURE_TOTAL: &str = "tessera_warm_failure_total";

#[derive(Clone)]
struct WarmEntry {
    component: Arc<dyn Component>,
    cacheable: bool,
}

/// One component that could not be warmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarmFailure {
    pub component_id: ComponentId,
    pub component_type: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub warmed: usize,
    pub skipped: usize,
    pub failures: Vec<WarmFailure>,
}

impl WarmReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn absorb(&mut self, outcome: WarmOutcome) {
        match outcome {
            WarmOutcome::Warmed => self.warmed += 1,
            WarmOutcome::Failed(failure) => self.failures.push(failure),
        }
    }
}

enum WarmOutcome {
    Warmed,
    Failed(WarmFailure),
}

/// Registration counts. Serializes flat, as
/// `{"total_components": 3, "types": 2, "type_Badge": 2, "type_Clock": 1}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmerStats {
    pub total_components: usize,
    pub by_type: BTreeMap<&'static str, usize>,
}

impl WarmerStats {
    pub fn types(&self) -> usize {
        self.by_type.len()
    }

    pub fn count_of(&self, type_name: &str) -> usize {
        self.by_type.get(type_name).copied().unwrap_or(0)
    }
}

impl Serialize for WarmerStats {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2 + self.by_type.len()))?;
        map.serialize_entry("total_components", &self.total_components)?;
        map.serialize_entry("types", &self.types())?;
        for (type_name, count) in &self.by_type {
            map.serialize_entry(&format!("type_{type_name}"), count)?;
        }
        map.end()
    }
}

pub struct CacheWarmer {
    client: CacheClient,
    entries: RwLock<Vec<WarmEntry>>,
}

impl CacheWarmer {
    pub fn new(client: CacheClient) -> Self {
        Self {
            client,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn client(&self) -> &CacheClient {
        &self.client
    }

    /// Track `component`. Non-cacheable components count towards the stats but
    /// are never warmed.
    pub fn register(&self, component: Arc<dyn Component>) {
        let cacheable = component.cacheable();
        let mut entries = self.entries.write_at(LockSite::new(SOURCE, "register"));
        entries.push(WarmEntry {
            component,
            cacheable,
        });
    }

    pub fn register_all<I>(&self, components: I)
    where
        I: IntoIterator<Item = Arc<dyn Component>>,
    {
        let mut entries = self.entries.write_at(LockSite::new(SOURCE, "register_all"));
        entries.extend(components.into_iter().map(|component| WarmEntry {
            cacheable: component.cacheable(),
            component,
        }));
    }

    pub fn len(&self) -> usize {
        self.entries.read_at(LockSite::new(SOURCE, "len")).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered components in registration order.
    pub fn components(&self) -> Vec<Arc<dyn Component>> {
        self.entries
            .read_at(LockSite::new(SOURCE, "components"))
            .iter()
            .map(|entry| entry.component.clone())
            .collect()
    }

    fn snapshot(&self) -> Vec<WarmEntry> {
        self.entries.read_at(LockSite::new(SOURCE, "snapshot")).clone()
    }

    /// Warm every cacheable component sequentially, in registration order.
    #[instrument(skip(self))]
    pub fn warm_all(&self, ttl: Option<Duration>) -> WarmReport {
        self.warm_sequential(self.snapshot(), ttl)
    }

    /// Warm only components whose type name is exactly `type_name`.
    #[instrument(skip(self))]
    pub fn warm_by_type(&self, type_name: &str, ttl: Option<Duration>) -> WarmReport {
        let selected = self
            .snapshot()
            .into_iter()
            .filter(|entry| entry.component.type_name() == type_name)
            .collect();
        self.warm_sequential(selected, ttl)
    }

    fn warm_sequential(&self, entries: Vec<WarmEntry>, ttl: Option<Duration>) -> WarmReport {
        let started = Instant::now();
        let mut report = WarmReport::default();

        for entry in entries {
            if !entry.cacheable {
                report.skipped += 1;
                continue;
            }
            report.absorb(warm_one(&self.client, entry.component.as_ref(), ttl));
        }

        log_report("sequential", &report, started);
        report
    }

    /// Warm cacheable components in consecutive batches of `batch_size`.
    ///
    /// Each batch runs in parallel on the blocking pool and the next batch
    /// starts only once the whole batch has finished. A `batch_size` of zero is
    /// treated as one.
    #[instrument(skip(self))]
    pub async fn warm_all_concurrent(
        &self,
        batch_size: usize,
        ttl: Option<Duration>,
    ) -> WarmReport {
        let started = Instant::now();
        let batch_size = batch_size.max(1);
        let mut report = WarmReport::default();

        let (cacheable, skipped): (Vec<_>, Vec<_>) =
            self.snapshot().into_iter().partition(|entry| entry.cacheable);
        report.skipped = skipped.len();

        for batch in cacheable.chunks(batch_size) {
            let tasks = batch.iter().map(|entry| {
                let client = self.client.clone();
                let component = entry.component.clone();
                async move {
                    let id = component.id().clone();
                    let type_name = component.type_name();
                    let joined =
                        tokio::task::spawn_blocking(move || warm_one(&client, component.as_ref(), ttl))
                            .await;
                    match joined {
                        Ok(outcome) => outcome,
                        Err(err) => failed(id, type_name, format!("warm task aborted: {err}")),
                    }
                }
            });

            for outcome in join_all(tasks).await {
                report.absorb(outcome);
            }
        }

        log_report("concurrent", &report, started);
        report
    }

    pub fn stats(&self) -> WarmerStats {
        let entries = self.entries.read_at(LockSite::new(SOURCE, "stats"));
        let mut stats = WarmerStats {
            total_components: entries.len(),
            ..WarmerStats::default()
        };
        for entry in entries.iter() {
            *stats.by_type.entry(entry.component.type_name()).or_insert(0) += 1;
        }
        stats
    }
}

fn warm_one(client: &CacheClient, component: &dyn Component, ttl: Option<Duration>) -> WarmOutcome {
    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| client.warm_cache(component, ttl)));
    histogram!(METRIC_WARM_MS).record(started.elapsed().as_secs_f64() * 1000.0);

    match result {
        Ok(Ok(_)) => WarmOutcome::Warmed,
        Ok(Err(err)) => failed(component.id().clone(), component.type_name(), err.to_string()),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            failed(
                component.id().clone(),
                component.type_name(),
                format!("render panicked: {message}"),
            )
        }
    }
}

fn failed(component_id: ComponentId, component_type: &'static str, error: String) -> WarmOutcome {
    counter!(METRIC_WARM_FAILURE_TOTAL).increment(1);
    warn!(
        target: "tessera::cache_warmer",
        component_id = %component_id,
        component_type,
        error = %error,
        "failed to warm component"
    );
    WarmOutcome::Failed(WarmFailure {
        component_id,
        component_type,
        error,
    })
}

fn log_report(mode: &'static str, report: &WarmReport, started: Instant) {
    info!(
        target: "tessera::cache_warmer",
        mode,
        warmed = report.warmed,
        skipped = report.skipped,
        failed = report.failures.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "cache warming finished"
    );
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::{CacheConfig, MemoryStore};
    use crate::domain::{component::Attributes, error::RenderError};

    struct Tile {
        id: ComponentId,
        attributes: Attributes,
        kind: &'static str,
        cacheable: bool,
        fail: bool,
    }

    impl Tile {
        fn new(kind: &'static str, n: usize) -> Self {
            Self {
                id: ComponentId::new(format!("{kind}-{n}")),
                attributes: Attributes::new().with("n", n.to_string()),
                kind,
                cacheable: true,
                fail: false,
            }
        }
    }

    impl Component for Tile {
        fn id(&self) -> &ComponentId {
            &self.id
        }

        fn type_name(&self) -> &'static str {
            self.kind
        }

        fn attributes(&self) -> &Attributes {
            &self.attributes
        }

        fn render_content(&self) -> Result<String, RenderError> {
            if self.fail {
                return Err(RenderError::failed(self.kind, "boom"));
            }
            Ok(format!("<tile>{}</tile>", self.id))
        }

        fn cacheable(&self) -> bool {
            self.cacheable
        }
    }

    fn warmer() -> CacheWarmer {
        let config = CacheConfig::default();
        let store = Arc::new(MemoryStore::new(&config));
        CacheWarmer::new(CacheClient::new(store, &config))
    }

    #[test]
    fn stats_count_every_registration() {
        let warmer = warmer();
        warmer.register(Arc::new(Tile::new("X", 1)));
        warmer.register(Arc::new(Tile::new("X", 2)));
        warmer.register(Arc::new(Tile {
            cacheable: false,
            ..Tile::new("Y", 1)
        }));

        let stats = warmer.stats();
        assert_eq!(stats.total_components, 3);
        assert_eq!(stats.types(), 2);
        assert_eq!(
            serde_json::to_value(&stats).expect("serialize"),
            json!({"total_components": 3, "types": 2, "type_X": 2, "type_Y": 1})
        );
    }

    #[test]
    fn warm_all_skips_non_cacheable() {
        let warmer = warmer();
        let hidden = Arc::new(Tile {
            cacheable: false,
            ..Tile::new("X", 9)
        });
        warmer.register(Arc::new(Tile::new("X", 1)));
        warmer.register(hidden.clone());

        let report = warmer.warm_all(None);
        assert_eq!(report.warmed, 1);
        assert_eq!(report.skipped, 1);

        let store = warmer.client().store().expect("store");
        assert!(!store.exists(&hidden.cache_key()));
    }

    #[test]
    fn failures_do_not_abort_the_run() {
        let warmer = warmer();
        warmer.register(Arc::new(Tile {
            fail: true,
            ..Tile::new("X", 1)
        }));
        warmer.register(Arc::new(Tile::new("X", 2)));

        let report = warmer.warm_all(None);
        assert_eq!(report.warmed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].component_id.as_str(), "X-1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn zero_batch_size_still_warms() {
        let warmer = warmer();
        for n in 0..3 {
            warmer.register(Arc::new(Tile::new("X", n)));
        }

        let report = warmer.warm_all_concurrent(0, None).await;
        assert_eq!(report.warmed, 3);
        assert!(report.is_clean());
    }
}
