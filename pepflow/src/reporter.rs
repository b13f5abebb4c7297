use async_trait::async_trait;
use serde::Serialize;
use tracing::error;

use crate::stats::JobStatistics;

/// An in-loop failure with the message that caused it.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorReport {
    /// Which loop or component failed.
    pub component: &'static str,
    pub error: String,
    /// Raw body of the offending message, when there was one.
    pub message: Option<String>,
    /// Whether the message was acknowledged despite the failure.
    pub acknowledged: bool,
}

impl ErrorReport {
    pub fn new(component: &'static str, error: impl Into<String>) -> Self {
        Self {
            component,
            error: error.into(),
            message: None,
            acknowledged: false,
        }
    }

    /// Report for an error, rendering its whole context chain.
    pub fn from_error(component: &'static str, err: &anyhow::Error) -> Self {
        Self::new(component, format!("{err:#}"))
    }

    pub fn with_message(mut self, body: impl Into<String>) -> Self {
        self.message = Some(body.into());
        self
    }

    pub fn acknowledged(mut self, acknowledged: bool) -> Self {
        self.acknowledged = acknowledged;
        self
    }
}

/// External error tracker.
#[async_trait]
pub trait ErrorReporter: Send + Sync {
    async fn notify(&self, report: ErrorReport);
}

/// Writes reports to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingErrorReporter;

#[async_trait]
impl ErrorReporter for TracingErrorReporter {
    async fn notify(&self, report: ErrorReport) {
        error!(
            component = report.component,
            acknowledged = report.acknowledged,
            message = report.message.as_deref().unwrap_or(""),
            "{}",
            report.error
        );
    }
}

/// External endpoint collecting job statistics.
#[async_trait]
pub trait StatisticsSink: Send + Sync {
    async fn submit(&self, statistics: &JobStatistics) -> anyhow::Result<()>;
}
