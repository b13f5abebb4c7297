use async_trait::async_trait;
use parking_lot::Mutex;
use pepflow::node::Node;
use pepflow::store::{Datafile, EntityStore, ResultFile, SearchDatabase};
use pepflow::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Entity store held in memory, with inspection helpers for assertions.
#[derive(Clone, Default)]
pub struct InMemoryEntityStore {
    state: Arc<Mutex<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    jobs: HashMap<JobId, Job>,
    chunks: BTreeMap<ChunkKey, Chunk>,
    datafiles: HashMap<Uuid, Datafile>,
    databases: HashMap<Uuid, SearchDatabase>,
    results: Vec<ResultFile>,
    nodes: Vec<Node>,
    fail_job_saves: bool,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_datafile(&self, datafile: Datafile) {
        self.state.lock().datafiles.insert(datafile.id, datafile);
    }

    pub fn insert_search_database(&self, database: SearchDatabase) {
        self.state.lock().databases.insert(database.id, database);
    }

    /// Stores a job directly, ignoring injected save failures.
    pub fn put_job(&self, job: &Job) {
        self.state.lock().jobs.insert(job.id, job.clone());
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.state.lock().jobs.get(&id).cloned()
    }

    /// Chunks of a job in send order.
    pub fn chunks(&self, job_id: JobId) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = self
            .state
            .lock()
            .chunks
            .values()
            .filter(|chunk| chunk.job_id == job_id)
            .cloned()
            .collect();
        chunks.sort_by(|a, b| a.sent_at.total_cmp(&b.sent_at));
        chunks
    }

    /// Overwrites a stored chunk, for arranging timing scenarios.
    pub fn put_chunk(&self, chunk: Chunk) {
        self.state.lock().chunks.insert(chunk.chunk_key.clone(), chunk);
    }

    pub fn results(&self) -> Vec<ResultFile> {
        self.state.lock().results.clone()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.state.lock().nodes.clone()
    }

    /// Makes every subsequent `save_job` fail.
    pub fn fail_job_saves(&self, fail: bool) {
        self.state.lock().fail_job_saves = fail;
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn find_job(&self, id: JobId) -> anyhow::Result<Option<Job>> {
        Ok(self.job(id))
    }

    async fn incomplete_jobs(&self) -> anyhow::Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .state
            .lock()
            .jobs
            .values()
            .filter(|job| !job.status.is_complete())
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn save_job(&self, job: &Job) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.fail_job_saves {
            anyhow::bail!("job store unavailable");
        }
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn delete_job(&self, id: JobId) -> anyhow::Result<bool> {
        let mut state = self.state.lock();
        let existed = state.jobs.remove(&id).is_some();
        state.chunks.retain(|_, chunk| chunk.job_id != id);
        Ok(existed)
    }

    async fn chunks_for_job(&self, job_id: JobId) -> anyhow::Result<Vec<Chunk>> {
        Ok(self.chunks(job_id))
    }

    async fn find_chunk(&self, key: &ChunkKey) -> anyhow::Result<Option<Chunk>> {
        Ok(self.state.lock().chunks.get(key).cloned())
    }

    async fn insert_chunk(&self, chunk: &Chunk) -> anyhow::Result<bool> {
        let mut state = self.state.lock();
        if state.chunks.contains_key(&chunk.chunk_key) {
            return Ok(false);
        }
        state.chunks.insert(chunk.chunk_key.clone(), chunk.clone());
        Ok(true)
    }

    async fn save_chunk(&self, chunk: &Chunk) -> anyhow::Result<()> {
        self.put_chunk(chunk.clone());
        Ok(())
    }

    async fn find_datafile(&self, id: Uuid) -> anyhow::Result<Option<Datafile>> {
        Ok(self.state.lock().datafiles.get(&id).cloned())
    }

    async fn find_search_database(&self, id: Uuid) -> anyhow::Result<Option<SearchDatabase>> {
        Ok(self.state.lock().databases.get(&id).cloned())
    }

    async fn save_result(&self, result: &ResultFile) -> anyhow::Result<()> {
        self.state.lock().results.push(result.clone());
        Ok(())
    }

    async fn save_node(&self, node: &Node) -> anyhow::Result<bool> {
        let mut state = self.state.lock();
        if state
            .nodes
            .iter()
            .any(|existing| existing.instance_id == node.instance_id)
        {
            return Ok(false);
        }
        state.nodes.push(node.clone());
        Ok(true)
    }
}
