//! Prometheus metrics for pepflow.
//!
//! All metrics are conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `pepflow_messages_handled_total` - Messages handled by either loop
//! - `pepflow_stuck_jobs_total` - Jobs the sweep found stuck
//! - `pepflow_chunks_created_total` - Chunks announced by splits
//!
//! ## Histograms
//! - `pepflow_chunk_duration_seconds` - Time a node spent on one chunk
#![cfg(feature = "metrics")]

use prometheus::{CounterVec, HistogramVec, IntCounter, Opts, Registry, exponential_buckets};
use std::sync::LazyLock;

/// Global Prometheus registry for pepflow metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels:
/// - `queue`: `head` or `node`
/// - `message_type`: the message's type tag
/// - `outcome`: `acked`, `retained` or `dropped`
pub static MESSAGES_HANDLED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "pepflow_messages_handled_total",
        "Total number of queue messages handled",
    );
    CounterVec::new(opts, &["queue", "message_type", "outcome"])
        .expect("pepflow_messages_handled_total metric creation failed")
});

/// Labels:
/// - `reason`: `chunks` or `packing`
pub static STUCK_JOBS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("pepflow_stuck_jobs_total", "Total number of stuck jobs detected");
    CounterVec::new(opts, &["reason"]).expect("pepflow_stuck_jobs_total metric creation failed")
});

pub static CHUNKS_CREATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pepflow_chunks_created_total",
        "Total number of chunks announced",
    )
    .expect("pepflow_chunks_created_total metric creation failed")
});

/// Labels:
/// - `searcher`: `omssa` or `tandem`
pub static CHUNK_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.5, 2.0, 14).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "pepflow_chunk_duration_seconds",
        "Chunk processing duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["searcher"])
        .expect("pepflow_chunk_duration_seconds metric creation failed")
});

/// Register all metrics with the global registry.
///
/// This function is idempotent - calling it multiple times is safe.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(MESSAGES_HANDLED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(STUCK_JOBS_TOTAL.clone()),
        Box::new(CHUNKS_CREATED_TOTAL.clone()),
        Box::new(CHUNK_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_message_handled(queue: &str, message_type: &str, outcome: &str) {
    MESSAGES_HANDLED_TOTAL
        .with_label_values(&[queue, message_type, outcome])
        .inc();
}

pub fn record_stuck_job(reason: &str) {
    STUCK_JOBS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_chunks_created(count: u64) {
    CHUNKS_CREATED_TOTAL.inc_by(count);
}

pub fn observe_chunk_duration(searcher: &str, duration_secs: f64) {
    CHUNK_DURATION_SECONDS
        .with_label_values(&[searcher])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init_metrics().expect("metrics initialization should succeed");
        init_metrics().expect("second initialization should be a no-op");
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().expect("metrics initialization should succeed");

        record_message_handled("head", "finish", "acked");
        record_stuck_job("chunks");
        record_chunks_created(3);
        observe_chunk_duration("omssa", 12.0);

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("pepflow_messages_handled_total"));
        assert!(output.contains("pepflow_stuck_jobs_total"));
        assert!(output.contains("pepflow_chunks_created_total"));
    }
}
