//! Tracing setup and instrumentation helpers for pepflow.
//!
//! The span and record helpers work both with and without the `metrics`
//! feature flag; without it they only log.
//!
//! # Example
//!
//! ```ignore
//! use pepflow::telemetry::{message_span, record_message_handled};
//!
//! let span = message_span("head", "finish", Some(job_id));
//! // ... handle the message inside the span
//! record_message_handled("head", "finish", "acked");
//! ```

use std::fmt::Display;

use tracing::{Span, info_span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// Installs the global subscriber. `RUST_LOG` overrides the configured
/// default directive.
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_directive));

    if config.json_format {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .try_init()?;
    }

    tracing::info!(json_format = config.json_format, "tracing initialized");
    Ok(())
}

/// Span covering the handling of one queue message.
#[must_use]
pub fn message_span(
    queue: impl AsRef<str>,
    message_type: impl AsRef<str>,
    job_id: Option<impl Display>,
) -> Span {
    let span = info_span!(
        "pepflow.message",
        queue = %queue.as_ref(),
        message_type = %message_type.as_ref(),
        job_id = tracing::field::Empty,
    );
    if let Some(job_id) = job_id {
        span.record("job_id", tracing::field::display(job_id));
    }
    span
}

/// Span covering one stuck-job sweep.
#[must_use]
pub fn sweep_span(incomplete_jobs: usize) -> Span {
    info_span!("pepflow.sweep", incomplete_jobs = incomplete_jobs)
}

/// Span covering the split of one job's input.
#[must_use]
pub fn split_span(job_id: impl Display, spectra_count: u32) -> Span {
    info_span!(
        "pepflow.split",
        job_id = %job_id,
        spectra_count = spectra_count,
    )
}

/// Record the outcome of handling a message.
///
/// `outcome` is one of `acked`, `retained` or `dropped`.
pub fn record_message_handled(
    queue: impl AsRef<str>,
    message_type: impl AsRef<str>,
    outcome: impl AsRef<str>,
) {
    tracing::debug!(
        queue = %queue.as_ref(),
        message_type = %message_type.as_ref(),
        outcome = %outcome.as_ref(),
        "message handled"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_message_handled(
        queue.as_ref(),
        message_type.as_ref(),
        outcome.as_ref(),
    );
}

/// Record that the sweep acted on a stuck job.
///
/// `reason` is `chunks` or `packing`.
pub fn record_stuck_job(job_id: impl Display, reason: impl AsRef<str>) {
    tracing::warn!(job_id = %job_id, reason = %reason.as_ref(), "job is stuck");

    #[cfg(feature = "metrics")]
    crate::metrics::record_stuck_job(reason.as_ref());
}

/// Record chunks announced by a split.
pub fn record_chunks_created(job_id: impl Display, count: usize) {
    tracing::info!(job_id = %job_id, chunks = count, "chunks created");

    #[cfg(feature = "metrics")]
    crate::metrics::record_chunks_created(count as u64);
}

/// Observe how long a chunk took to process.
pub fn observe_chunk_duration(searcher: impl AsRef<str>, duration_secs: f64) {
    tracing::debug!(
        searcher = %searcher.as_ref(),
        duration_secs = duration_secs,
        "chunk duration observed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_chunk_duration(searcher.as_ref(), duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_span() {
        let span = message_span("head", "finish", Some("job-123"));
        assert_eq!(span.metadata().unwrap().name(), "pepflow.message");
    }

    #[test]
    fn test_message_span_without_job() {
        let span = message_span("head", "process-database", None::<&str>);
        assert_eq!(span.metadata().unwrap().name(), "pepflow.message");
    }

    #[test]
    fn test_sweep_span() {
        let span = sweep_span(3);
        assert_eq!(span.metadata().unwrap().name(), "pepflow.sweep");
    }

    #[test]
    fn test_split_span() {
        let span = split_span("job-123", 200);
        assert_eq!(span.metadata().unwrap().name(), "pepflow.split");
    }

    #[test]
    fn test_record_helpers_do_not_panic() {
        record_message_handled("node", "process", "acked");
        record_stuck_job("job-123", "chunks");
        record_chunks_created("job-123", 3);
        observe_chunk_duration("omssa", 1.5);
    }
}
