use std::sync::Arc;

use anyhow::Context;
use tracing::{Instrument, debug, warn};

use crate::chunk::ChunkKey;
use crate::config::PipelineConfig;
use crate::job::epoch_now;
use crate::message::{ChunkCreated, HeadMessage, JobRef, WorkRequest};
use crate::object_store::{JobKeys, ObjectStore, file_name};
use crate::queue::Outbox;
use crate::splitter;
use crate::telemetry;

/// Node-side handling of an `unpack` request: split the job's input into
/// chunks, upload them and announce each one on the head queue.
#[derive(Clone)]
pub struct Unpacker {
    objects: Arc<dyn ObjectStore>,
    outbox: Outbox,
    config: Arc<PipelineConfig>,
}

impl Unpacker {
    pub fn new(objects: Arc<dyn ObjectStore>, outbox: Outbox, config: Arc<PipelineConfig>) -> Self {
        Self {
            objects,
            outbox,
            config,
        }
    }

    /// Runs the split. The scratch directory is removed on every exit path.
    ///
    /// `job-unpacked` is sent only after every chunk has been uploaded and
    /// announced.
    pub async fn run(&self, request: &WorkRequest) -> anyhow::Result<Vec<ChunkCreated>> {
        let span = telemetry::split_span(request.job_id, request.spectra_count);
        async {
            let job = JobRef {
                job_id: request.job_id,
            };
            self.outbox.send_head(&HeadMessage::JobUnpacking(job)).await?;

            tokio::fs::create_dir_all(&self.config.work_dir)
                .await
                .with_context(|| format!("creating {}", self.config.work_dir.display()))?;
            let scratch = tempfile::Builder::new()
                .prefix("unpack-")
                .tempdir_in(&self.config.work_dir)?;

            let announced = self.split_and_announce(request, scratch.path()).await;
            if let Err(err) = scratch.close() {
                warn!(error = %err, "failed to remove unpack directory");
            }
            let announced = announced?;

            self.outbox.send_head(&HeadMessage::JobUnpacked(job)).await?;
            telemetry::record_chunks_created(request.job_id, announced.len());
            Ok(announced)
        }
        .instrument(span)
        .await
    }

    async fn split_and_announce(
        &self,
        request: &WorkRequest,
        scratch: &std::path::Path,
    ) -> anyhow::Result<Vec<ChunkCreated>> {
        let keys = JobKeys::new(&request.hash_key);
        let input_key = keys.object(&request.input_ref);
        let bytes = self
            .objects
            .get(&input_key)
            .await
            .with_context(|| format!("downloading {input_key}"))?;
        let local_input = scratch.join(file_name(&request.input_ref));
        tokio::fs::write(&local_input, &bytes).await?;
        drop(bytes);

        let chunks = splitter::split_file(
            &local_input,
            &scratch.join("mgfs"),
            request.spectra_count,
        )
        .await?;
        let chunk_count = u32::try_from(chunks.len())?;
        let parameter_object_key = keys.parameter_file(&self.config);
        debug!(chunks = chunk_count, "input split");

        let mut announced = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let object_key = keys.object(chunk.file_name());
            let body = tokio::fs::read(&chunk.path).await?;
            self.objects
                .put(&object_key, body)
                .await
                .with_context(|| format!("uploading {object_key}"))?;

            let sendtime = epoch_now();
            let created = ChunkCreated {
                chunk_count,
                bytes: chunk.bytes,
                sendtime,
                chunk_key: ChunkKey::derive(&object_key),
                job_id: request.job_id,
                object_key,
                parameter_object_key: parameter_object_key.clone(),
                bucket: request.bucket.clone(),
                searcher: request.searcher,
            };
            self.outbox
                .send_head(&HeadMessage::Created(created.clone()))
                .await?;
            announced.push(created);
        }
        Ok(announced)
    }
}
