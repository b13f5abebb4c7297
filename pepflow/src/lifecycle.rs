//! Job lifecycle operations shared by the dispatcher and job submitters.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunk::{Chunk, chunks_processed, chunks_stuck};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::job::{HashKey, Job, JobId, JobStatus, NewJob, clean_name, epoch_now};
use crate::message::{ChunkRequest, HeadMessage, JobRef, NodeMessage, WorkRequest};
use crate::object_store::{JobKeys, ObjectStore, pending_key, result_link};
use crate::queue::Outbox;
use crate::search_config::{SearchConfigRegistry, SearchParameters, search_database_name};
use crate::stats::JobStatistics;
use crate::store::{Datafile, EntityStore, ResultFile};

/// Output object keys a node bundles into the result archive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackManifest {
    pub hash_key: HashKey,
    pub outputs: Vec<String>,
}

/// External entities a job's work requests are built from.
#[derive(Clone)]
pub struct JobContext {
    pub datafile: Datafile,
    pub parameters: Arc<dyn SearchParameters>,
}

/// `{name}_{datafile}_{database}_{searcher}_{parameters}_{spectra_count}`,
/// each part cleaned to `[0-9a-z.-]`.
pub fn result_filename(job: &Job, context: &JobContext) -> String {
    format!(
        "{}_{}_{}_{}_{}_{}",
        clean_name(&job.name),
        clean_name(context.datafile.stem()),
        clean_name(search_database_name(context.parameters.database())),
        job.searcher,
        clean_name(context.parameters.name()),
        job.spectra_count
    )
}

/// Applies lifecycle transitions to jobs and emits the messages each one
/// implies.
#[derive(Clone)]
pub struct JobLifecycle {
    store: Arc<dyn EntityStore>,
    objects: Arc<dyn ObjectStore>,
    outbox: Outbox,
    search_configs: Arc<SearchConfigRegistry>,
    config: Arc<PipelineConfig>,
}

impl JobLifecycle {
    pub fn new(
        store: Arc<dyn EntityStore>,
        objects: Arc<dyn ObjectStore>,
        outbox: Outbox,
        search_configs: Arc<SearchConfigRegistry>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            store,
            objects,
            outbox,
            search_configs,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn config(&self) -> &Arc<PipelineConfig> {
        &self.config
    }

    /// Validates and persists a new `Pending` job.
    pub async fn create(&self, new: NewJob) -> anyhow::Result<Job> {
        let job = Job::create(new)?;
        self.store.save_job(&job).await?;
        info!(job_id = %job.id, hash_key = %job.hash_key(), "job created");
        Ok(job)
    }

    pub async fn require_job(&self, id: JobId) -> anyhow::Result<Job> {
        self.store
            .find_job(id)
            .await?
            .ok_or_else(|| PipelineError::not_found("job", id).into())
    }

    pub async fn context(&self, job: &Job) -> anyhow::Result<JobContext> {
        let datafile = self
            .store
            .find_datafile(job.datafile_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("datafile", job.datafile_id))?;
        let parameters = self
            .search_configs
            .load(job.searcher, job.parameter_file_id)
            .await?;
        Ok(JobContext {
            datafile,
            parameters,
        })
    }

    pub fn work_request(&self, job: &Job, context: &JobContext) -> WorkRequest {
        WorkRequest {
            bucket: self.config.bucket.clone(),
            job_id: job.id,
            hash_key: job.hash_key().clone(),
            input_ref: context.datafile.uploaded_file_name.clone(),
            result_filename: result_filename(job, context),
            searcher: job.searcher,
            database: search_database_name(context.parameters.database()).to_string(),
            spectra_count: job.spectra_count,
            priority: job.priority,
        }
    }

    pub fn chunk_request(&self, job: &Job, chunk: &Chunk) -> ChunkRequest {
        ChunkRequest {
            job_id: job.id,
            chunk_key: chunk.chunk_key.clone(),
            object_key: chunk.filename.clone(),
            parameter_object_key: chunk.parameter_filename.clone(),
            bucket: self.config.bucket.clone(),
            searcher: job.searcher,
            hash_key: job.hash_key().clone(),
            priority: job.priority,
        }
    }

    /// Marks the job `Launching` and asks the head to upload its input.
    pub async fn launch(&self, job: &mut Job) -> anyhow::Result<()> {
        job.advance(JobStatus::Launching)?;
        job.launched_at = epoch_now();
        self.store.save_job(job).await?;
        self.outbox
            .send_head(&HeadMessage::BackgroundUpload(JobRef { job_id: job.id }))
            .await?;
        info!(job_id = %job.id, "job launched");
        Ok(())
    }

    /// Stages the job's parameter file and input under its hash key, requests
    /// an unpack, then records the job as `Uploading`.
    ///
    /// The status is written only after the unpack request is queued, so a
    /// failure before that point leaves the job `Launching` and redelivery
    /// retries the whole step. Once the job is `Uploading` or later the call
    /// returns `false` without side effects.
    pub async fn background_upload(&self, job_id: JobId) -> anyhow::Result<bool> {
        let mut job = self.require_job(job_id).await?;
        if job.status >= JobStatus::Uploading {
            debug!(job_id = %job.id, status = %job.status, "upload already done");
            return Ok(false);
        }

        let context = self.context(&job).await?;
        let keys = JobKeys::new(job.hash_key());

        tokio::fs::create_dir_all(&self.config.work_dir)
            .await
            .with_context(|| format!("creating {}", self.config.work_dir.display()))?;
        let scratch = tempfile::Builder::new()
            .prefix("upload-")
            .tempdir_in(&self.config.work_dir)?;
        let local = context
            .parameters
            .write_local(scratch.path(), &self.config.parameter_filename)
            .await
            .context("writing parameter file")?;
        let parameter_bytes = tokio::fs::read(&local).await?;
        self.objects
            .put(&keys.parameter_file(&self.config), parameter_bytes)
            .await
            .context("uploading parameter file")?;

        let bundle = &context.datafile.uploaded_file_name;
        let input = self
            .objects
            .get(&pending_key(bundle))
            .await
            .with_context(|| format!("reading pending input {bundle}"))?;
        self.objects
            .put(&keys.object(bundle), input)
            .await
            .with_context(|| format!("staging input {bundle}"))?;

        let request = self.work_request(&job, &context);
        self.outbox.send_node(&NodeMessage::Unpack(request)).await?;
        job.advance(JobStatus::Uploading)?;
        self.store.save_job(&job).await?;
        info!(job_id = %job.id, "input staged, unpack requested");
        Ok(true)
    }

    /// Every chunk finished and all announced chunks are recorded.
    pub async fn processed(&self, job_id: JobId) -> anyhow::Result<bool> {
        Ok(chunks_processed(&self.store.chunks_for_job(job_id).await?))
    }

    pub async fn stuck_chunks(&self, job: &Job, now: f64) -> anyhow::Result<bool> {
        let chunks = self.store.chunks_for_job(job.id).await?;
        Ok(chunks_stuck(&chunks, now, self.config.stuck_threshold_secs))
    }

    pub async fn send_process(&self, job: &Job, chunk: &Chunk) -> anyhow::Result<()> {
        self.outbox
            .send_node(&NodeMessage::Process(self.chunk_request(job, chunk)))
            .await?;
        Ok(())
    }

    /// Re-emits a process request for every unfinished chunk.
    pub async fn resend_stuck_chunks(&self, job: &Job) -> anyhow::Result<usize> {
        let chunks = self.store.chunks_for_job(job.id).await?;
        let mut sent = 0;
        for chunk in chunks.iter().filter(|chunk| !chunk.is_finished()) {
            self.send_process(job, chunk).await?;
            sent += 1;
        }
        Ok(sent)
    }

    async fn upload_manifest(&self, hash_key: &HashKey) -> anyhow::Result<usize> {
        let keys = JobKeys::new(hash_key);
        let outputs = self.objects.list(&keys.output_prefix()).await?;
        let count = outputs.len();
        let manifest = PackManifest {
            hash_key: hash_key.clone(),
            outputs,
        };
        self.objects
            .put(&keys.manifest(&self.config), serde_json::to_vec(&manifest)?)
            .await?;
        Ok(count)
    }

    /// Uploads the output manifest and, only if that succeeds, records the
    /// pack request and emits one `pack` message.
    ///
    /// On manifest failure the job is left untouched and `false` is returned;
    /// the stuck sweep retries later. A job already `Packing` keeps its status.
    pub async fn send_pack_request(&self, job: &mut Job) -> anyhow::Result<bool> {
        let context = self.context(job).await?;
        match self.upload_manifest(job.hash_key()).await {
            Ok(outputs) => debug!(job_id = %job.id, outputs, "manifest uploaded"),
            Err(err) => {
                warn!(job_id = %job.id, error = %format!("{err:#}"), "manifest upload failed, pack deferred");
                return Ok(false);
            }
        }

        if job.status < JobStatus::RequestedPacking {
            job.advance(JobStatus::RequestedPacking)?;
        }
        job.started_pack_at = epoch_now();
        self.store.save_job(job).await?;
        let request = self.work_request(job, &context);
        self.outbox.send_node(&NodeMessage::Pack(request)).await?;
        info!(job_id = %job.id, status = %job.status, "pack requested");
        Ok(true)
    }

    /// Moves the job to `status` unless it is already there or beyond.
    pub async fn set_status(&self, job: &mut Job, status: JobStatus) -> anyhow::Result<bool> {
        if status <= job.status {
            debug!(job_id = %job.id, current = %job.status, requested = %status, "status unchanged");
            return Ok(false);
        }
        job.advance(status)?;
        self.store.save_job(job).await?;
        info!(job_id = %job.id, status = %job.status, "job status updated");
        Ok(true)
    }

    /// Records the result bundle, completes the job and releases its working
    /// storage.
    ///
    /// A cleanup failure is returned after the job is saved as `Complete`, so
    /// the `job-packed` message is redelivered; for a job that is already
    /// `Complete` only the cleanup runs again.
    pub async fn finalize(&self, job: &mut Job) -> anyhow::Result<bool> {
        if job.status.is_complete() {
            self.release_working_storage(job).await?;
            return Ok(false);
        }
        let context = self.context(job).await?;
        let name = result_filename(job, &context);
        let link = result_link(&self.config, &name);
        self.store
            .save_result(&ResultFile {
                id: Uuid::now_v7(),
                job_id: job.id,
                name,
                link: link.clone(),
                created_at: Utc::now(),
            })
            .await?;

        job.link = Some(link);
        job.advance(JobStatus::Complete)?;
        job.finished_at = epoch_now();
        self.store.save_job(job).await?;
        info!(job_id = %job.id, link = job.link.as_deref().unwrap_or_default(), "job complete");

        self.release_working_storage(job).await?;
        Ok(true)
    }

    async fn release_working_storage(&self, job: &Job) -> anyhow::Result<()> {
        let removed = self
            .cleanup_storage(job.hash_key())
            .await
            .with_context(|| format!("releasing working storage of job {}", job.id))?;
        if removed > 0 {
            debug!(job_id = %job.id, objects = removed, "working storage released");
        }
        Ok(())
    }

    /// Marks statistics as sent and queues their submission.
    pub async fn send_statistics(&self, job: &mut Job) -> anyhow::Result<()> {
        job.statistics_sent = true;
        self.store.save_job(job).await?;
        self.outbox
            .send_head(&HeadMessage::SendStatistics(JobRef { job_id: job.id }))
            .await?;
        Ok(())
    }

    pub async fn statistics(&self, job: &Job) -> anyhow::Result<JobStatistics> {
        let chunks = self.store.chunks_for_job(job.id).await?;
        let parameters = self
            .search_configs
            .load(job.searcher, job.parameter_file_id)
            .await?;
        Ok(JobStatistics::collect(job, &chunks, parameters.stats()))
    }

    /// Deletes the job and its chunks, then its stored objects.
    ///
    /// Returns `false` if the job did not exist. If the storage phase fails
    /// the rows are already gone; rerun [`Self::cleanup_storage`] with the
    /// job's hash key.
    pub async fn delete_job(&self, job_id: JobId) -> anyhow::Result<bool> {
        let Some(job) = self.store.find_job(job_id).await? else {
            return Ok(false);
        };
        self.store.delete_job(job_id).await?;
        let removed = self
            .cleanup_storage(job.hash_key())
            .await
            .with_context(|| format!("cleaning storage of deleted job {job_id}"))?;
        info!(job_id = %job_id, objects = removed, "job deleted");
        Ok(true)
    }

    /// Removes the parameter file and everything under the job's hash key.
    /// Missing objects are not an error.
    pub async fn cleanup_storage(&self, hash_key: &HashKey) -> anyhow::Result<u64> {
        let keys = JobKeys::new(hash_key);
        self.objects.delete(&keys.parameter_file(&self.config)).await?;
        self.objects.delete_prefix(&keys.prefix()).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;

    use super::*;
    use crate::job::SearcherKind;

    struct Params;

    #[async_trait]
    impl SearchParameters for Params {
        fn name(&self) -> &str {
            "Default Params #1"
        }

        fn database(&self) -> &str {
            "Human_2010.fasta"
        }

        async fn write_local(&self, dir: &Path, filename: &str) -> anyhow::Result<PathBuf> {
            Ok(dir.join(filename))
        }

        fn stats(&self) -> BTreeMap<String, String> {
            BTreeMap::new()
        }
    }

    #[test]
    fn result_filename_is_cleaned_and_ordered() {
        let job = Job::create(NewJob {
            name: "Liver Digest!".into(),
            searcher: Some(SearcherKind::Tandem),
            parameter_file_id: Some(Uuid::new_v4()),
            datafile_id: Some(Uuid::new_v4()),
            spectra_count: Some(200),
            priority: Some(100),
        })
        .unwrap();
        let context = JobContext {
            datafile: Datafile {
                id: job.datafile_id,
                name: "liver".into(),
                uploaded_file_name: "Liver_Run1.mgf.zip".into(),
            },
            parameters: Arc::new(Params),
        };
        assert_eq!(
            result_filename(&job, &context),
            "liverdigest_liverrun1_human2010_tandem_defaultparams1_200"
        );
    }
}
