use pepflow::config::PipelineConfig;
use pepflow::node::NodeIdentity;
use pepflow::object_store::pending_key;
use pepflow::runtime::{Dispatcher, DispatcherBuilder, NodeWorker, NodeWorkerBuilder};
use pepflow::search_config::SearchConfigRegistry;
use pepflow::store::Datafile;
use pepflow::*;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

use crate::{
    InMemoryEntityStore, InMemoryMessageQueue, InMemoryObjectStore, RecordingCatalog,
    RecordingErrorReporter, RecordingStatisticsSink, ScriptedSearcher, StaticSearchConfigLoader,
    StaticSearchParameters, mgf_records, sample_datafile, sample_submission,
};

/// A head dispatcher and one node worker wired to shared in-memory
/// collaborators, with one datafile staged under `pending-jobs/`.
pub struct TestPipeline {
    pub queue: Arc<InMemoryMessageQueue>,
    pub store: Arc<InMemoryEntityStore>,
    pub objects: Arc<InMemoryObjectStore>,
    pub reporter: Arc<RecordingErrorReporter>,
    pub statistics: Arc<RecordingStatisticsSink>,
    pub catalog: Arc<RecordingCatalog>,
    pub searcher: Arc<ScriptedSearcher>,
    pub config: Arc<PipelineConfig>,
    pub dispatcher: Dispatcher,
    pub worker: NodeWorker,
    pub datafile: Datafile,
    pub parameter_file_id: Uuid,
    _work_dir: TempDir,
}

impl TestPipeline {
    /// Builds the pipeline with a staged input of `records` spectra.
    pub fn new(records: usize) -> anyhow::Result<Self> {
        let work_dir = tempfile::tempdir()?;
        let config = Arc::new(PipelineConfig {
            work_dir: work_dir.path().to_path_buf(),
            ..PipelineConfig::default()
        });

        let queue = Arc::new(InMemoryMessageQueue::new());
        let store = Arc::new(InMemoryEntityStore::new());
        let objects = Arc::new(InMemoryObjectStore::new());
        let reporter = Arc::new(RecordingErrorReporter::new());
        let statistics = Arc::new(RecordingStatisticsSink::new());
        let catalog = Arc::new(RecordingCatalog::new());
        let searcher = Arc::new(ScriptedSearcher::new(objects.clone()));

        let datafile = sample_datafile("liver_run1.mgf");
        objects.insert(pending_key(&datafile.uploaded_file_name), mgf_records(records));
        store.insert_datafile(datafile.clone());

        let parameter_file_id = Uuid::new_v4();
        let loader = StaticSearchConfigLoader::new().with(
            parameter_file_id,
            StaticSearchParameters::new("Default Params #1", "Human_2010.fasta"),
        );
        let registry = SearchConfigRegistry::new().with_loader(SearcherKind::Tandem, Arc::new(loader));

        let dispatcher = DispatcherBuilder::new(Arc::clone(&config))
            .with_queue(queue.clone())
            .with_store(store.clone())
            .with_objects(objects.clone())
            .with_search_configs(Arc::new(registry))
            .with_catalog(catalog.clone())
            .with_statistics(statistics.clone())
            .with_reporter(reporter.clone())
            .with_identity(NodeIdentity::new("head-test", "head"))
            .build()?;

        let worker = NodeWorkerBuilder::new(Arc::clone(&config))
            .with_queue(queue.clone())
            .with_objects(objects.clone())
            .with_searcher(searcher.clone())
            .with_reporter(reporter.clone())
            .with_registry(store.clone())
            .with_identity(NodeIdentity::new("node-test", "node"))
            .build()?;

        Ok(Self {
            queue,
            store,
            objects,
            reporter,
            statistics,
            catalog,
            searcher,
            config,
            dispatcher,
            worker,
            datafile,
            parameter_file_id,
            _work_dir: work_dir,
        })
    }

    /// Creates and launches a job over the staged datafile.
    pub async fn submit(&self, spectra_count: u32) -> anyhow::Result<Job> {
        let lifecycle = self.dispatcher.lifecycle();
        let mut job = lifecycle
            .create(sample_submission(self.datafile.id, self.parameter_file_id, spectra_count))
            .await?;
        lifecycle.launch(&mut job).await?;
        Ok(job)
    }

    /// Alternates both loops until neither finds a message, up to `rounds`
    /// rounds. Returns the number of messages handled.
    pub async fn drain(&mut self, rounds: usize) -> usize {
        let mut total = 0;
        for _ in 0..rounds {
            let handled = self.dispatcher.run_until_idle(1000).await
                + self.worker.run_until_idle(1000).await;
            if handled == 0 {
                break;
            }
            total += handled;
        }
        total
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.store.job(id)
    }
}
