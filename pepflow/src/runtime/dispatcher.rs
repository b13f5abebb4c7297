//! Head-side control loop.
//!
//! The dispatcher fetches one `head` message at a time, applies the state
//! change it implies and acknowledges it only once that change is stored.
//! Every handler tolerates redelivery. Between messages it periodically
//! sweeps incomplete jobs for lost progress.

use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{Instrument, debug, info, warn};

use crate::chunk::Chunk;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, is_non_retryable, is_not_found};
use crate::job::{JobId, JobStatus, epoch_now};
use crate::lease::Delivery;
use crate::lifecycle::JobLifecycle;
use crate::message::{ChunkCreated, ChunkProgress, HeadMessage};
use crate::node::{NodeIdentity, register_node};
use crate::queue::{MessageQueue, QueueName};
use crate::reporter::{ErrorReport, ErrorReporter, StatisticsSink};
use crate::store::{CatalogProcessor, EntityStore};
use crate::telemetry;

use super::shutdown::ShutdownToken;

const COMPONENT: &str = "dispatcher";

/// What one poll of a loop did with the queue.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollOutcome {
    /// No visible message.
    Idle,
    /// Handled and acknowledged.
    Acked,
    /// Acknowledged without a state change: unknown type, undecodable body,
    /// unresolved entity or a permanently missing object.
    Dropped,
    /// Left in the queue for redelivery.
    Retained,
    /// The fetch itself failed.
    FetchFailed,
}

impl PollOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollOutcome::Idle => "idle",
            PollOutcome::Acked => "acked",
            PollOutcome::Dropped => "dropped",
            PollOutcome::Retained => "retained",
            PollOutcome::FetchFailed => "fetch_failed",
        }
    }

    /// Whether the loop should pause before polling again.
    pub fn should_wait(&self) -> bool {
        matches!(self, PollOutcome::Idle | PollOutcome::FetchFailed)
    }
}

/// Tally of one stuck sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub stuck_chunks: usize,
    pub chunks_resent: usize,
    pub stuck_packing: usize,
    pub packs_reissued: usize,
    pub errors: usize,
}

pub struct Dispatcher {
    lifecycle: JobLifecycle,
    queue: Arc<dyn MessageQueue>,
    catalog: Arc<dyn CatalogProcessor>,
    statistics: Arc<dyn StatisticsSink>,
    reporter: Arc<dyn ErrorReporter>,
    config: Arc<PipelineConfig>,
    identity: NodeIdentity,
    last_swept: Option<Instant>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("identity", &self.identity)
            .field("last_swept", &self.last_swept)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        lifecycle: JobLifecycle,
        catalog: Arc<dyn CatalogProcessor>,
        statistics: Arc<dyn StatisticsSink>,
        reporter: Arc<dyn ErrorReporter>,
        identity: NodeIdentity,
    ) -> Self {
        let queue = Arc::clone(lifecycle.outbox().queue());
        let config = Arc::clone(lifecycle.config());
        Self {
            lifecycle,
            queue,
            catalog,
            statistics,
            reporter,
            config,
            identity,
            last_swept: None,
        }
    }

    pub fn lifecycle(&self) -> &JobLifecycle {
        &self.lifecycle
    }

    fn store(&self) -> &Arc<dyn EntityStore> {
        self.lifecycle.store()
    }

    /// Registers this instance, then polls until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: ShutdownToken) -> anyhow::Result<()> {
        if let Err(err) = register_node(self.store().as_ref(), &self.identity).await {
            warn!(error = %format!("{err:#}"), "node registration failed");
            self.reporter
                .notify(ErrorReport::from_error(COMPONENT, &err))
                .await;
        }
        info!(instance_id = %self.identity.instance_id, "dispatcher started");

        let poll_interval = self.config.poll_interval();
        while !shutdown.is_cancelled() {
            let outcome = self.run_once().await;
            if outcome.should_wait() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }

        info!("dispatcher shutting down");
        Ok(())
    }

    /// Polls until the queue is empty or `max_messages` were handled.
    /// Returns how many messages were fetched.
    pub async fn run_until_idle(&mut self, max_messages: usize) -> usize {
        let mut handled = 0;
        while handled < max_messages {
            if self.run_once().await.should_wait() {
                break;
            }
            handled += 1;
        }
        handled
    }

    /// Sweeps if one is due, then fetches and handles at most one message.
    pub async fn run_once(&mut self) -> PollOutcome {
        if self.sweep_due() {
            self.last_swept = Some(Instant::now());
            match self.sweep_stuck_jobs(epoch_now()).await {
                Ok(report) if report != SweepReport::default() => {
                    debug!(?report, "stuck sweep finished");
                }
                Ok(_) => {}
                Err(err) => {
                    self.reporter
                        .notify(ErrorReport::from_error(COMPONENT, &err))
                        .await;
                }
            }
        }

        let delivery = match self.queue.get(QueueName::Head).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => return PollOutcome::Idle,
            Err(err) => {
                self.reporter
                    .notify(ErrorReport::from_error(COMPONENT, &err.context("fetching from head")))
                    .await;
                return PollOutcome::FetchFailed;
            }
        };
        self.process(&delivery).await
    }

    fn sweep_due(&self) -> bool {
        self.last_swept
            .is_none_or(|at| at.elapsed() >= self.config.sweep_interval())
    }

    async fn process(&self, delivery: &Delivery) -> PollOutcome {
        let message = match HeadMessage::decode(&delivery.body) {
            Ok(message) => message,
            Err(err) => {
                let err = anyhow::Error::from(err);
                return self.drop_failed(delivery, "undecodable", &err).await;
            }
        };
        let Some(kind) = message.kind() else {
            debug!(body = %delivery.body, "dropping message of unknown type");
            return self.acknowledge(delivery, "unknown", PollOutcome::Dropped).await;
        };

        let span = telemetry::message_span(QueueName::Head, kind.as_str(), message.job_id());
        let result = self.handle(&message).instrument(span).await;

        match result {
            Ok(()) => self.acknowledge(delivery, kind.as_str(), PollOutcome::Acked).await,
            Err(err) if is_not_found(&err) => {
                info!(
                    message_type = kind.as_str(),
                    error = %err,
                    "target no longer exists, dropping message"
                );
                self.acknowledge(delivery, kind.as_str(), PollOutcome::Dropped).await
            }
            Err(err) if is_non_retryable(&err) => {
                self.drop_failed(delivery, kind.as_str(), &err).await
            }
            Err(err) => {
                self.reporter
                    .notify(ErrorReport::from_error(COMPONENT, &err).with_message(&delivery.body))
                    .await;
                telemetry::record_message_handled(QueueName::Head, kind.as_str(), "retained");
                PollOutcome::Retained
            }
        }
    }

    async fn drop_failed(
        &self,
        delivery: &Delivery,
        message_type: &str,
        err: &anyhow::Error,
    ) -> PollOutcome {
        self.reporter
            .notify(
                ErrorReport::from_error(COMPONENT, err)
                    .with_message(&delivery.body)
                    .acknowledged(true),
            )
            .await;
        self.acknowledge(delivery, message_type, PollOutcome::Dropped).await
    }

    async fn acknowledge(
        &self,
        delivery: &Delivery,
        message_type: &str,
        outcome: PollOutcome,
    ) -> PollOutcome {
        if let Err(err) = self.queue.ack(delivery).await {
            self.reporter
                .notify(
                    ErrorReport::from_error(COMPONENT, &err.context("acknowledging message"))
                        .with_message(&delivery.body),
                )
                .await;
            telemetry::record_message_handled(QueueName::Head, message_type, "retained");
            return PollOutcome::Retained;
        }
        telemetry::record_message_handled(QueueName::Head, message_type, outcome.as_str());
        outcome
    }

    /// Applies one message. Errors leave the message for redelivery unless
    /// they classify as not-found or non-retryable.
    pub async fn handle(&self, message: &HeadMessage) -> anyhow::Result<()> {
        match message {
            HeadMessage::Created(created) => self.chunk_created(created).await,
            HeadMessage::Start(progress) => self.chunk_started(progress).await,
            HeadMessage::Finish(progress) => self.chunk_finished(progress).await,
            HeadMessage::BackgroundUpload(job) => {
                self.lifecycle.background_upload(job.job_id).await?;
                Ok(())
            }
            HeadMessage::ProcessDatabase { database_id } => {
                let database = self
                    .store()
                    .find_search_database(*database_id)
                    .await?
                    .ok_or_else(|| PipelineError::not_found("search database", database_id))?;
                self.catalog.process_database(&database).await
            }
            HeadMessage::ProcessDatafile { datafile_id } => {
                let datafile = self
                    .store()
                    .find_datafile(*datafile_id)
                    .await?
                    .ok_or_else(|| PipelineError::not_found("datafile", datafile_id))?;
                self.catalog.process_datafile(&datafile).await
            }
            HeadMessage::SendStatistics(job) => {
                let job = self.lifecycle.require_job(job.job_id).await?;
                let statistics = self.lifecycle.statistics(&job).await?;
                self.statistics.submit(&statistics).await
            }
            HeadMessage::JobUnpacking(job) => self.set_status(job.job_id, JobStatus::Unpacking).await,
            HeadMessage::JobUnpacked(job) => self.set_status(job.job_id, JobStatus::Processing).await,
            HeadMessage::JobPacking(job) => self.set_status(job.job_id, JobStatus::Packing).await,
            HeadMessage::JobPacked(job) => {
                let mut job = self.lifecycle.require_job(job.job_id).await?;
                self.lifecycle.finalize(&mut job).await?;
                Ok(())
            }
            HeadMessage::Unknown => Ok(()),
        }
    }

    async fn set_status(&self, job_id: JobId, status: JobStatus) -> anyhow::Result<()> {
        let mut job = self.lifecycle.require_job(job_id).await?;
        self.lifecycle.set_status(&mut job, status).await?;
        Ok(())
    }

    /// Records the chunk once per key and requests its processing. A
    /// redelivered announcement re-emits the request only while the chunk is
    /// still untouched.
    async fn chunk_created(&self, created: &ChunkCreated) -> anyhow::Result<()> {
        let job = self.lifecycle.require_job(created.job_id).await?;
        let (chunk, inserted) = match self.store().find_chunk(&created.chunk_key).await? {
            Some(existing) => (existing, false),
            None => {
                let chunk = Chunk::from_created(created);
                let inserted = self.store().insert_chunk(&chunk).await?;
                (chunk, inserted)
            }
        };
        if job.status.is_complete() {
            debug!(chunk_key = %chunk.chunk_key, "job already complete, not processing chunk");
            return Ok(());
        }
        if inserted || (!chunk.is_started() && !chunk.is_finished()) {
            self.lifecycle.send_process(&job, &chunk).await?;
        }
        Ok(())
    }

    async fn find_chunk(&self, progress: &ChunkProgress) -> anyhow::Result<Chunk> {
        let chunk = self
            .store()
            .find_chunk(&progress.chunk_key)
            .await?
            .filter(|chunk| chunk.job_id == progress.job_id)
            .ok_or_else(|| PipelineError::not_found("chunk", &progress.chunk_key))?;
        Ok(chunk)
    }

    async fn chunk_started(&self, progress: &ChunkProgress) -> anyhow::Result<()> {
        let mut chunk = self.find_chunk(progress).await?;
        if chunk.record_start(&progress.instance_id, progress.timestamp) {
            self.store().save_chunk(&chunk).await?;
        }
        Ok(())
    }

    /// Records the finish, then requests packing once every chunk is done.
    /// The processed check runs even for a duplicate finish so a pack request
    /// lost after an earlier save is still issued; the status guard keeps it
    /// from being issued twice.
    async fn chunk_finished(&self, progress: &ChunkProgress) -> anyhow::Result<()> {
        let mut chunk = self.find_chunk(progress).await?;
        if chunk.record_finish(&progress.instance_id, progress.timestamp) {
            self.store().save_chunk(&chunk).await?;
        }

        let mut job = self.lifecycle.require_job(progress.job_id).await?;
        if job.status < JobStatus::RequestedPacking && self.lifecycle.processed(job.id).await? {
            self.lifecycle.send_pack_request(&mut job).await?;
        }
        Ok(())
    }

    /// Checks every incomplete job for lost progress.
    ///
    /// Jobs whose chunks are stuck get the configured priority and their
    /// unfinished chunks re-requested; otherwise jobs stuck in packing get a
    /// fresh pack request. A failure on one job is reported and the sweep
    /// moves on.
    pub async fn sweep_stuck_jobs(&self, now: f64) -> anyhow::Result<SweepReport> {
        let jobs = self.store().incomplete_jobs().await?;
        let span = telemetry::sweep_span(jobs.len());
        let mut report = SweepReport {
            examined: jobs.len(),
            ..SweepReport::default()
        };

        async {
            for mut job in jobs {
                let result: anyhow::Result<()> = async {
                    if self.lifecycle.stuck_chunks(&job, now).await? {
                        telemetry::record_stuck_job(job.id, "chunks");
                        report.stuck_chunks += 1;
                        job.priority = self.config.stuck_priority;
                        self.store().save_job(&job).await?;
                        report.chunks_resent += self.lifecycle.resend_stuck_chunks(&job).await?;
                    } else if job.stuck_packing(now, self.config.stuck_threshold_secs) {
                        telemetry::record_stuck_job(job.id, "packing");
                        report.stuck_packing += 1;
                        if self.lifecycle.send_pack_request(&mut job).await? {
                            report.packs_reissued += 1;
                        }
                    }
                    Ok(())
                }
                .await;

                if let Err(err) = result {
                    report.errors += 1;
                    self.reporter
                        .notify(ErrorReport::from_error(
                            COMPONENT,
                            &err.context(format!("sweeping job {}", job.id)),
                        ))
                        .await;
                }
            }
        }
        .instrument(span)
        .await;

        Ok(report)
    }
}
