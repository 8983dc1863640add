//! Prometheus metrics for the depot.
//!
//! Counters cover uploads and deduplication, blob writes and deletes,
//! downloads, event dispatch and analytics persistence.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static UPLOADS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("depot_uploads_total", "Total number of files uploaded")
        .expect("metric creation failed")
});

pub static DEDUP_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_dedup_hits_total",
        "Uploads that reused an already stored blob",
    )
    .expect("metric creation failed")
});

pub static BYTES_DEDUPLICATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_bytes_deduplicated_total",
        "Bytes not written to the blob store thanks to deduplication",
    )
    .expect("metric creation failed")
});

pub static BLOB_WRITES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("depot_blob_writes_total", "Blobs written to the blob store")
        .expect("metric creation failed")
});

pub static BLOB_DELETES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_blob_deletes_total",
        "Blobs deleted from the blob store",
    )
    .expect("metric creation failed")
});

pub static DOWNLOADS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("depot_downloads_total", "Downloads and views served")
        .expect("metric creation failed")
});

pub static EVENTS_PUBLISHED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_download_events_published_total",
        "Download events handed to the event bus",
    )
    .expect("metric creation failed")
});

pub static EVENT_HANDLER_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "depot_event_handler_failures_total",
            "Event handler runs that failed or panicked, by handler",
        ),
        &["handler"],
    )
    .expect("metric creation failed")
});

pub static ANALYTICS_RECORDS_WRITTEN: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_analytics_records_written_total",
        "Download analytics records persisted",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register every metric with [`REGISTRY`]. Safe to call more than once.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(UPLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DEDUP_HITS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_DEDUPLICATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BLOB_WRITES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BLOB_DELETES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DOWNLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(EVENTS_PUBLISHED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(EVENT_HANDLER_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ANALYTICS_RECORDS_WRITTEN.clone()))
            .expect("metric registration failed");
    });
}

/// Render every registered metric in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# failed to encode metrics: {e}\n");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Count one failed event handler run.
pub fn record_handler_failure(handler: &str) {
    // Keep the label short: the type name without its module path
    let short = handler.rsplit("::").next().unwrap_or(handler);
    EVENT_HANDLER_FAILURES.with_label_values(&[short]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_render_includes_registered_counters() {
        register_metrics();
        UPLOADS.inc();
        record_handler_failure("depot_service::handlers::RecordDownloadHandler");
        let text = render();
        assert!(text.contains("depot_uploads_total"));
        assert!(text.contains(r#"handler="RecordDownloadHandler""#));
    }
}
