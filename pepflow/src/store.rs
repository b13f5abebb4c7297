use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunk::{Chunk, ChunkKey};
use crate::job::{Job, JobId};
use crate::node::Node;
use crate::splitter::input_stem;

/// An uploaded spectra file a job searches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Datafile {
    pub id: Uuid,
    pub name: String,
    /// Name of the bundle under `pending-jobs/`.
    pub uploaded_file_name: String,
}

impl Datafile {
    /// Uploaded name up to its first `.`, the same stem chunk files carry.
    pub fn stem(&self) -> &str {
        input_stem(&self.uploaded_file_name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchDatabase {
    pub id: Uuid,
    pub name: String,
    pub keyword: String,
    pub version: String,
}

/// Record of a completed job's downloadable bundle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultFile {
    pub id: Uuid,
    pub job_id: JobId,
    pub name: String,
    pub link: String,
    pub created_at: DateTime<Utc>,
}

/// Durable storage for jobs, chunks, nodes and their catalog entities.
///
/// Lookups return `Ok(None)` for unknown ids; callers decide whether that
/// is an error.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find_job(&self, id: JobId) -> anyhow::Result<Option<Job>>;

    /// Every job whose status is not `Complete`.
    async fn incomplete_jobs(&self) -> anyhow::Result<Vec<Job>>;

    async fn save_job(&self, job: &Job) -> anyhow::Result<()>;

    /// Removes the job and all of its chunks. Returns whether the job existed.
    async fn delete_job(&self, id: JobId) -> anyhow::Result<bool>;

    async fn chunks_for_job(&self, job_id: JobId) -> anyhow::Result<Vec<Chunk>>;

    async fn find_chunk(&self, key: &ChunkKey) -> anyhow::Result<Option<Chunk>>;

    /// Inserts a chunk unless one with the same key exists. Returns whether a
    /// row was written.
    async fn insert_chunk(&self, chunk: &Chunk) -> anyhow::Result<bool>;

    async fn save_chunk(&self, chunk: &Chunk) -> anyhow::Result<()>;

    async fn find_datafile(&self, id: Uuid) -> anyhow::Result<Option<Datafile>>;

    async fn find_search_database(&self, id: Uuid) -> anyhow::Result<Option<SearchDatabase>>;

    async fn save_result(&self, result: &ResultFile) -> anyhow::Result<()>;

    /// Writes a node record unless the instance is already registered.
    /// Returns whether a row was written.
    async fn save_node(&self, node: &Node) -> anyhow::Result<bool>;
}

/// Processing run against catalog entities when they are uploaded.
#[async_trait]
pub trait CatalogProcessor: Send + Sync {
    async fn process_database(&self, database: &SearchDatabase) -> anyhow::Result<()>;

    async fn process_datafile(&self, datafile: &Datafile) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datafile_stem_stops_at_first_dot() {
        let datafile = Datafile {
            id: Uuid::new_v4(),
            name: "Liver".into(),
            uploaded_file_name: "liver_run1.mgf.zip".into(),
        };
        assert_eq!(datafile.stem(), "liver_run1");
        assert!(
            crate::splitter::chunk_file_name(datafile.stem(), 0)
                .starts_with(input_stem("liver_run1.mgf"))
        );
    }
}
