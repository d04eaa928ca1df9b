//! Observability metrics for the downloader
//!
//! Counters and histograms for page queries, media transfers, retries and quota
//! waits. Without [`init_metrics`] no recorder is installed and every call here
//! is a no-op, so library users pay nothing for it.

use ::metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info};

use crate::downloader::quota::QuotaKind;

static METRICS_INITIALIZED: OnceCell<SocketAddr> = OnceCell::new();

/// Install the Prometheus exporter and register metric descriptions.
///
/// Idempotent: later calls are ignored. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    if let Some(existing) = METRICS_INITIALIZED.get() {
        debug!(%existing, "Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "inat_page_queries_total",
        Unit::Count,
        "Page queries sent to the observations endpoint"
    );
    describe_counter!(
        "inat_http_retries_total",
        Unit::Count,
        "Retry attempts after transient transport failures"
    );
    describe_counter!(
        "inat_media_bytes_total",
        Unit::Bytes,
        "Photo bytes downloaded"
    );
    describe_counter!(
        "inat_media_failures_total",
        Unit::Count,
        "Photo downloads skipped after a failure"
    );
    describe_counter!(
        "inat_records_processed_total",
        Unit::Count,
        "Observations handed to the sink"
    );
    describe_counter!(
        "inat_quota_consumed_total",
        Unit::Count,
        "Units charged to each quota window"
    );
    describe_histogram!(
        "inat_quota_wait_seconds",
        Unit::Seconds,
        "Time spent parked on an exhausted quota window"
    );
    describe_histogram!(
        "inat_retry_backoff_seconds",
        Unit::Seconds,
        "Backoff applied before a retry"
    );

    let _ = METRICS_INITIALIZED.set(addr);
    info!(%addr, "Prometheus metrics endpoint listening");
    Ok(())
}

/// Count a page query for a collection
pub fn record_page_query(collection: &str) {
    counter!("inat_page_queries_total", "collection" => collection.to_string()).increment(1);
}

/// Count a retry and its backoff
pub fn record_retry(reason: &'static str, backoff: Duration) {
    counter!("inat_http_retries_total", "reason" => reason).increment(1);
    histogram!("inat_retry_backoff_seconds", "reason" => reason).record(backoff.as_secs_f64());
}

/// Count downloaded media bytes
pub fn record_media_bytes(bytes: u64) {
    counter!("inat_media_bytes_total").increment(bytes);
}

/// Count a skipped media download
pub fn record_media_failure() {
    counter!("inat_media_failures_total").increment(1);
}

/// Count a processed observation
pub fn record_processed(collection: &str) {
    counter!("inat_records_processed_total", "collection" => collection.to_string()).increment(1);
}

/// Count units charged to a quota window
pub fn record_quota_consumed(kind: QuotaKind, amount: u64) {
    counter!("inat_quota_consumed_total", "window" => kind.label()).increment(amount);
}

/// Record time parked on a quota window
pub fn record_quota_wait(kind: QuotaKind, wait: Duration) {
    histogram!("inat_quota_wait_seconds", "window" => kind.label()).record(wait.as_secs_f64());
}
