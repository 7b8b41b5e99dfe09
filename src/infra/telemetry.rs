use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
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

    // Logs go to stderr so command output on stdout stays machine-readable.
    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "coursebook_hierarchy_cache_hit_total",
            Unit::Count,
            "Hierarchy reads served from the snapshot cache."
        );
        describe_counter!(
            "coursebook_hierarchy_cache_miss_total",
            Unit::Count,
            "Hierarchy reads that had to load from the store."
        );
        describe_counter!(
            "coursebook_hierarchy_cache_invalidate_total",
            Unit::Count,
            "Explicit hierarchy cache invalidations."
        );
        describe_counter!(
            "coursebook_hierarchy_populate_skipped_total",
            Unit::Count,
            "Loaded snapshots discarded because a write invalidated them mid-load."
        );
        describe_histogram!(
            "coursebook_hierarchy_load_ms",
            Unit::Milliseconds,
            "Latency of loading the full hierarchy from the store."
        );
        describe_counter!(
            "coursebook_store_retry_total",
            Unit::Count,
            "Store calls retried after a transient failure, labelled by operation."
        );
    });
}
