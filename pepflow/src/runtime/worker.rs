//! Node-side control loop.
//!
//! Each poll fetches one `node` message, decodes it into a typed request
//! and executes it. Only an explicit [`DispatchStatus::Success`] removes the
//! message; a retryable failure is left for the queue's own redelivery.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{Instrument, info, warn};

use crate::config::PipelineConfig;
use crate::error::is_non_retryable;
use crate::job::epoch_now;
use crate::lease::Delivery;
use crate::lifecycle::PackManifest;
use crate::message::{ChunkProgress, ChunkRequest, HeadMessage, JobRef, NodeMessage, WorkRequest};
use crate::node::{NodeIdentity, register_node};
use crate::object_store::{JobKeys, ObjectStore};
use crate::queue::{MessageQueue, Outbox, QueueName};
use crate::reporter::{ErrorReport, ErrorReporter};
use crate::store::EntityStore;
use crate::telemetry;
use crate::unpacker::Unpacker;

use super::dispatcher::PollOutcome;
use super::shutdown::ShutdownToken;

const COMPONENT: &str = "node-worker";

/// Result of executing one node request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchStatus {
    /// Work completed; the message is removed.
    Success,
    /// Work failed but may succeed on redelivery.
    RetryableFailure {
        /// Error message.
        error: Option<String>,
    },
    /// Work can never succeed; the message is removed and reported.
    PermanentFailure {
        /// Error message.
        error: Option<String>,
    },
}

impl DispatchStatus {
    /// Classifies a failure: permanently missing objects and undecodable
    /// input are permanent, everything else is retryable.
    pub fn from_error(err: &anyhow::Error) -> Self {
        let error = Some(format!("{err:#}"));
        if is_non_retryable(err) {
            DispatchStatus::PermanentFailure { error }
        } else {
            DispatchStatus::RetryableFailure { error }
        }
    }
}

/// The external search engine a node delegates chunk work to.
#[async_trait]
pub trait Searcher: Send + Sync {
    /// Searches one chunk, writing its outputs under `{hash_key}/out/`.
    async fn process(&self, request: &ChunkRequest) -> anyhow::Result<()>;

    /// Bundles the manifest's outputs into the job's result archive.
    async fn pack(&self, request: &WorkRequest, manifest: &PackManifest) -> anyhow::Result<()>;
}

pub struct NodeWorker {
    queue: Arc<dyn MessageQueue>,
    outbox: Outbox,
    objects: Arc<dyn ObjectStore>,
    unpacker: Unpacker,
    searcher: Arc<dyn Searcher>,
    reporter: Arc<dyn ErrorReporter>,
    registry: Option<Arc<dyn EntityStore>>,
    identity: NodeIdentity,
    config: Arc<PipelineConfig>,
}

impl fmt::Debug for NodeWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeWorker")
            .field("identity", &self.identity)
            .field("registry_set", &self.registry.is_some())
            .finish()
    }
}

impl NodeWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        outbox: Outbox,
        objects: Arc<dyn ObjectStore>,
        searcher: Arc<dyn Searcher>,
        reporter: Arc<dyn ErrorReporter>,
        registry: Option<Arc<dyn EntityStore>>,
        identity: NodeIdentity,
        config: Arc<PipelineConfig>,
    ) -> Self {
        let unpacker = Unpacker::new(Arc::clone(&objects), outbox.clone(), Arc::clone(&config));
        Self {
            queue: Arc::clone(outbox.queue()),
            outbox,
            objects,
            unpacker,
            searcher,
            reporter,
            registry,
            identity,
            config,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Registers this instance, then polls until `shutdown` is cancelled.
    pub async fn run(self, shutdown: ShutdownToken) -> anyhow::Result<()> {
        if let Some(registry) = &self.registry {
            if let Err(err) = register_node(registry.as_ref(), &self.identity).await {
                warn!(error = %format!("{err:#}"), "node registration failed");
                self.reporter
                    .notify(ErrorReport::from_error(COMPONENT, &err))
                    .await;
            }
        }
        info!(instance_id = %self.identity.instance_id, "node worker started");

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

        info!("node worker shutting down");
        Ok(())
    }

    /// Polls until the queue is empty or `max_messages` were handled.
    /// Returns how many messages were fetched.
    pub async fn run_until_idle(&self, max_messages: usize) -> usize {
        let mut handled = 0;
        while handled < max_messages {
            if self.run_once().await.should_wait() {
                break;
            }
            handled += 1;
        }
        handled
    }

    /// Fetches and executes at most one message.
    pub async fn run_once(&self) -> PollOutcome {
        let delivery = match self.queue.get(QueueName::Node).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => return PollOutcome::Idle,
            Err(err) => {
                self.reporter
                    .notify(ErrorReport::from_error(COMPONENT, &err.context("fetching from node")))
                    .await;
                return PollOutcome::FetchFailed;
            }
        };

        let message = match NodeMessage::decode(&delivery.body) {
            Ok(message) => message,
            Err(err) => {
                let status = DispatchStatus::from_error(&anyhow::Error::from(err));
                return self.settle(&delivery, "undecodable", status).await;
            }
        };
        let Some(kind) = message.kind() else {
            warn!(body = %delivery.body, "dropping node message of unknown type");
            return self.acknowledge(&delivery, "unknown", PollOutcome::Dropped).await;
        };

        let span = telemetry::message_span(QueueName::Node, kind.as_str(), message.job_id());
        let status = self.execute(&message).instrument(span).await;
        self.settle(&delivery, kind.as_str(), status).await
    }

    /// Runs one decoded request.
    pub async fn execute(&self, message: &NodeMessage) -> DispatchStatus {
        let result = match message {
            NodeMessage::Unpack(request) => self.unpacker.run(request).await.map(drop),
            NodeMessage::Process(request) => self.process(request).await,
            NodeMessage::Pack(request) => self.pack(request).await,
            NodeMessage::Unknown => Ok(()),
        };
        match result {
            Ok(()) => DispatchStatus::Success,
            Err(err) => DispatchStatus::from_error(&err),
        }
    }

    async fn process(&self, request: &ChunkRequest) -> anyhow::Result<()> {
        let progress = |timestamp| ChunkProgress {
            job_id: request.job_id,
            chunk_key: request.chunk_key.clone(),
            instance_id: self.identity.instance_id.clone(),
            timestamp,
        };

        self.outbox
            .send_head(&HeadMessage::Start(progress(epoch_now())))
            .await?;
        let started = Instant::now();
        self.searcher
            .process(request)
            .await
            .with_context(|| format!("searching chunk {}", request.chunk_key))?;
        telemetry::observe_chunk_duration(request.searcher.as_str(), started.elapsed().as_secs_f64());
        self.outbox
            .send_head(&HeadMessage::Finish(progress(epoch_now())))
            .await?;
        Ok(())
    }

    async fn pack(&self, request: &WorkRequest) -> anyhow::Result<()> {
        let job = JobRef {
            job_id: request.job_id,
        };
        self.outbox.send_head(&HeadMessage::JobPacking(job)).await?;

        let manifest_key = JobKeys::new(&request.hash_key).manifest(&self.config);
        let body = self
            .objects
            .get(&manifest_key)
            .await
            .with_context(|| format!("reading {manifest_key}"))?;
        let manifest: PackManifest = serde_json::from_slice(&body)
            .map_err(crate::error::PipelineError::from)
            .with_context(|| format!("decoding {manifest_key}"))?;
        self.searcher
            .pack(request, &manifest)
            .await
            .with_context(|| format!("packing {}", request.result_filename))?;

        self.outbox.send_head(&HeadMessage::JobPacked(job)).await?;
        Ok(())
    }

    async fn settle(
        &self,
        delivery: &Delivery,
        message_type: &str,
        status: DispatchStatus,
    ) -> PollOutcome {
        match status {
            DispatchStatus::Success => {
                self.acknowledge(delivery, message_type, PollOutcome::Acked).await
            }
            DispatchStatus::RetryableFailure { error } => {
                self.reporter
                    .notify(
                        ErrorReport::new(COMPONENT, error.unwrap_or_default())
                            .with_message(&delivery.body),
                    )
                    .await;
                telemetry::record_message_handled(QueueName::Node, message_type, "retained");
                PollOutcome::Retained
            }
            DispatchStatus::PermanentFailure { error } => {
                self.reporter
                    .notify(
                        ErrorReport::new(COMPONENT, error.unwrap_or_default())
                            .with_message(&delivery.body)
                            .acknowledged(true),
                    )
                    .await;
                self.acknowledge(delivery, message_type, PollOutcome::Dropped).await
            }
        }
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
            telemetry::record_message_handled(QueueName::Node, message_type, "retained");
            return PollOutcome::Retained;
        }
        telemetry::record_message_handled(QueueName::Node, message_type, outcome.as_str());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::ObjectStoreError;

    #[test]
    fn missing_objects_are_permanent_failures() {
        let err = anyhow::Error::from(ObjectStoreError::NoSuchKey("k/in.mgf".into()))
            .context("downloading k/in.mgf");
        assert!(matches!(
            DispatchStatus::from_error(&err),
            DispatchStatus::PermanentFailure { error: Some(message) } if message.contains("k/in.mgf")
        ));
    }

    #[test]
    fn other_failures_are_retryable() {
        let err = anyhow::anyhow!("searcher crashed");
        assert_eq!(
            DispatchStatus::from_error(&err),
            DispatchStatus::RetryableFailure {
                error: Some("searcher crashed".into())
            }
        );
    }
}
