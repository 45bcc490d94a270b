use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "tessera_cache_hit_total",
            Unit::Count,
            "Total number of component cache hits."
        );
        describe_counter!(
            "tessera_cache_miss_total",
            Unit::Count,
            "Total number of component cache misses."
        );
        describe_counter!(
            "tessera_cache_expired_total",
            Unit::Count,
            "Total number of entries purged on access after their TTL passed."
        );
        describe_counter!(
            "tessera_cache_evict_total",
            Unit::Count,
            "Total number of cache evictions due to capacity."
        );
        describe_counter!(
            "tessera_cache_fetch_superseded_total",
            Unit::Count,
            "Computed values discarded because the key changed while rendering."
        );
        describe_histogram!(
            "tessera_warm_ms",
            Unit::Milliseconds,
            "Per-component cache warm latency in milliseconds."
        );
        describe_counter!(
            "tessera_warm_failure_total",
            Unit::Count,
            "Total number of components that failed to warm."
        );
        describe_counter!(
            "tessera_action_total",
            Unit::Count,
            "Total number of dispatched component actions by transport and outcome."
        );
        describe_gauge!(
            "tessera_sessions_active",
            Unit::Count,
            "Current number of open reactive sessions."
        );
        describe_counter!(
            "tessera_session_push_dropped_total",
            Unit::Count,
            "Pushed updates dropped because a session queue was full or closed."
        );
        describe_counter!(
            "tessera_session_pending_evicted_total",
            Unit::Count,
            "Pending component reservations dropped at the per-session cap."
        );
        describe_counter!(
            "tessera_lock_poison_recovered_total",
            Unit::Count,
            "Poisoned locks taken back after a panic, by module."
        );
    });
}
