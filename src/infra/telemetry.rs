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
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
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

/// Registers descriptions for every metric the crate emits. Safe to call repeatedly.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "flexcache_hit_total",
            Unit::Count,
            "Total number of output cache hits."
        );
        describe_counter!(
            "flexcache_miss_total",
            Unit::Count,
            "Total number of output cache misses, including expired entries."
        );
        describe_counter!(
            "flexcache_evict_total",
            Unit::Count,
            "Total number of output cache evictions due to capacity."
        );
        describe_counter!(
            "flexcache_rejected_total",
            Unit::Count,
            "Total number of entries refused admission to the output cache."
        );
        describe_counter!(
            "flexcache_invalidated_total",
            Unit::Count,
            "Total number of output cache entries removed by invalidation."
        );
        describe_gauge!(
            "flexcache_entries",
            Unit::Count,
            "Current number of entries in the output cache."
        );
        describe_gauge!(
            "flexcache_cost_bytes",
            Unit::Bytes,
            "Current total cost of the output cache in bytes."
        );
        describe_gauge!(
            "flexcache_queue_depth",
            Unit::Count,
            "Current number of pending publish jobs."
        );
        describe_counter!(
            "flexcache_job_persist_failed_total",
            Unit::Count,
            "Total number of publish job store writes that failed."
        );
        describe_histogram!(
            "flexcache_publish_ms",
            Unit::Milliseconds,
            "Publish action latency in milliseconds."
        );
    });
}
