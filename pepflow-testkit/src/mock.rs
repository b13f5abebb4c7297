use async_trait::async_trait;
use parking_lot::Mutex;
use pepflow::lifecycle::PackManifest;
use pepflow::object_store::{JobKeys, ObjectStore, completed_key, file_name};
use pepflow::reporter::{ErrorReport, ErrorReporter, StatisticsSink};
use pepflow::runtime::Searcher;
use pepflow::search_config::{SearchConfigLoader, SearchParameters};
use pepflow::stats::JobStatistics;
use pepflow::store::{CatalogProcessor, Datafile, SearchDatabase};
use pepflow::*;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Keeps every report it is handed.
#[derive(Clone, Default)]
pub struct RecordingErrorReporter {
    reports: Arc<Mutex<Vec<ErrorReport>>>,
}

impl RecordingErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().clone()
    }

    pub fn assert_report_count_eq(&self, expected: usize) {
        let reports = self.reports.lock();
        assert_eq!(
            reports.len(),
            expected,
            "Expected {} error reports, got {}: {:?}",
            expected,
            reports.len(),
            *reports
        );
    }

    pub fn clear(&self) {
        self.reports.lock().clear();
    }
}

#[async_trait]
impl ErrorReporter for RecordingErrorReporter {
    async fn notify(&self, report: ErrorReport) {
        self.reports.lock().push(report);
    }
}

#[derive(Clone, Default)]
pub struct RecordingStatisticsSink {
    submitted: Arc<Mutex<Vec<JobStatistics>>>,
}

impl RecordingStatisticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> Vec<JobStatistics> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl StatisticsSink for RecordingStatisticsSink {
    async fn submit(&self, statistics: &JobStatistics) -> anyhow::Result<()> {
        self.submitted.lock().push(statistics.clone());
        Ok(())
    }
}

/// Records which catalog entities were processed.
#[derive(Clone, Default)]
pub struct RecordingCatalog {
    databases: Arc<Mutex<Vec<Uuid>>>,
    datafiles: Arc<Mutex<Vec<Uuid>>>,
}

impl RecordingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn databases(&self) -> Vec<Uuid> {
        self.databases.lock().clone()
    }

    pub fn datafiles(&self) -> Vec<Uuid> {
        self.datafiles.lock().clone()
    }
}

#[async_trait]
impl CatalogProcessor for RecordingCatalog {
    async fn process_database(&self, database: &SearchDatabase) -> anyhow::Result<()> {
        self.databases.lock().push(database.id);
        Ok(())
    }

    async fn process_datafile(&self, datafile: &Datafile) -> anyhow::Result<()> {
        self.datafiles.lock().push(datafile.id);
        Ok(())
    }
}

/// Fixed search parameters that write a one-line parameter file.
#[derive(Clone, Debug)]
pub struct StaticSearchParameters {
    pub name: String,
    pub database: String,
}

impl StaticSearchParameters {
    pub fn new(name: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database: database.into(),
        }
    }
}

#[async_trait]
impl SearchParameters for StaticSearchParameters {
    fn name(&self) -> &str {
        &self.name
    }

    fn database(&self) -> &str {
        &self.database
    }

    async fn write_local(&self, dir: &Path, filename: &str) -> anyhow::Result<PathBuf> {
        let path = dir.join(filename);
        tokio::fs::write(&path, format!("database = {}\n", self.database)).await?;
        Ok(path)
    }

    fn stats(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("parameters".to_string(), self.name.clone()),
            ("database".to_string(), self.database.clone()),
        ])
    }
}

/// Loader over a fixed id-to-parameters map.
#[derive(Clone, Default)]
pub struct StaticSearchConfigLoader {
    configs: Arc<Mutex<HashMap<Uuid, Arc<dyn SearchParameters>>>>,
}

impl StaticSearchConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, id: Uuid, parameters: StaticSearchParameters) -> Self {
        self.configs.lock().insert(id, Arc::new(parameters));
        self
    }
}

#[async_trait]
impl SearchConfigLoader for StaticSearchConfigLoader {
    async fn load(&self, id: Uuid) -> anyhow::Result<Option<Arc<dyn SearchParameters>>> {
        Ok(self.configs.lock().get(&id).cloned())
    }
}

/// Searcher that reads its chunk, writes one output object per chunk and
/// packs outputs into a newline-separated listing.
///
/// Failures can be queued for upcoming `process` calls.
#[derive(Clone)]
pub struct ScriptedSearcher {
    objects: Arc<dyn ObjectStore>,
    processed: Arc<Mutex<Vec<ChunkKey>>>,
    packed: Arc<Mutex<Vec<JobId>>>,
    process_failures: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSearcher {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            objects,
            processed: Arc::new(Mutex::new(Vec::new())),
            packed: Arc::new(Mutex::new(Vec::new())),
            process_failures: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The next `process` call fails with `error`.
    pub fn fail_next_process(&self, error: impl Into<String>) {
        self.process_failures.lock().push(error.into());
    }

    pub fn processed(&self) -> Vec<ChunkKey> {
        self.processed.lock().clone()
    }

    pub fn packed(&self) -> Vec<JobId> {
        self.packed.lock().clone()
    }
}

#[async_trait]
impl Searcher for ScriptedSearcher {
    async fn process(&self, request: &ChunkRequest) -> anyhow::Result<()> {
        let failure = {
            let mut failures = self.process_failures.lock();
            (!failures.is_empty()).then(|| failures.remove(0))
        };
        if let Some(error) = failure {
            anyhow::bail!(error);
        }

        let input = self.objects.get(&request.object_key).await?;
        let output = format!(
            "{}{}.out",
            JobKeys::new(&request.hash_key).output_prefix(),
            file_name(&request.object_key)
        );
        self.objects.put(&output, input).await?;
        self.processed.lock().push(request.chunk_key.clone());
        Ok(())
    }

    async fn pack(&self, request: &WorkRequest, manifest: &PackManifest) -> anyhow::Result<()> {
        for output in &manifest.outputs {
            self.objects.get(output).await?;
        }
        self.objects
            .put(
                &completed_key(&request.result_filename),
                manifest.outputs.join("\n").into_bytes(),
            )
            .await?;
        self.packed.lock().push(request.job_id);
        Ok(())
    }
}
