use std::sync::Once;

use metrics::{Unit, describe_counter};
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
            "vignette_backfill_processed_total",
            Unit::Count,
            "Media items whose derived variants were produced successfully."
        );
        describe_counter!(
            "vignette_backfill_failed_total",
            Unit::Count,
            "Media items whose variant generation failed."
        );
        describe_counter!(
            "vignette_backfill_missing_source_total",
            Unit::Count,
            "Media items skipped because the source file was absent."
        );
        describe_counter!(
            "vignette_sync_dispatch_total",
            Unit::Count,
            "Sync jobs requested from the automation API."
        );
        describe_counter!(
            "vignette_sync_dispatch_failed_total",
            Unit::Count,
            "Sync dispatch attempts rejected or unreachable."
        );
    });
}
