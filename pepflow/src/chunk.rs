use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::job::JobId;
use crate::message::ChunkCreated;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub Uuid);

impl Default for ChunkId {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique key a chunk is announced and reported under.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ChunkKey(String);

impl ChunkKey {
    /// Derives the key from the chunk's object key alone, so every
    /// announcement of the same chunk file maps to the same row. Object keys
    /// live under the job's hash key and are unique across jobs.
    pub fn derive(object_key: &str) -> Self {
        Self(hex::encode(Sha256::digest(object_key.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ChunkKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ChunkKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One bounded partition of a job's input.
///
/// Timestamps are epoch seconds; `0.0` means unset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub job_id: JobId,
    pub chunk_key: ChunkKey,
    pub instance_id: Option<String>,
    pub filename: String,
    pub parameter_filename: String,
    pub bytes: u64,
    pub chunk_count: u32,
    pub sent_at: f64,
    pub started_at: f64,
    pub finished_at: f64,
}

impl Chunk {
    pub fn from_created(created: &ChunkCreated) -> Self {
        Self {
            id: ChunkId::new(),
            job_id: created.job_id,
            chunk_key: created.chunk_key.clone(),
            instance_id: None,
            filename: created.object_key.clone(),
            parameter_filename: created.parameter_object_key.clone(),
            bytes: created.bytes,
            chunk_count: created.chunk_count,
            sent_at: created.sendtime,
            started_at: 0.0,
            finished_at: 0.0,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started_at > 0.0
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at > 0.0
    }

    /// Records a worker claiming the chunk. Returns whether anything changed.
    ///
    /// Starts reported after the chunk finished, or older than the start
    /// already recorded, are ignored.
    pub fn record_start(&mut self, instance_id: &str, at: f64) -> bool {
        if self.is_finished() || at <= self.started_at {
            return false;
        }
        self.started_at = at;
        self.instance_id = Some(instance_id.to_string());
        true
    }

    /// Records completion. Returns whether anything changed.
    ///
    /// `finished_at` never moves backward and never precedes `started_at`.
    pub fn record_finish(&mut self, instance_id: &str, at: f64) -> bool {
        let at = at.max(self.started_at);
        if at <= self.finished_at {
            return false;
        }
        self.finished_at = at;
        if self.instance_id.is_none() {
            self.instance_id = Some(instance_id.to_string());
        }
        true
    }

    /// Seconds between start and finish, when both are recorded.
    pub fn duration(&self) -> Option<f64> {
        (self.is_started() && self.is_finished()).then(|| self.finished_at - self.started_at)
    }
}

/// Every recorded chunk finished and all announced chunks have arrived.
///
/// An empty set is never processed: the job's chunks are still arriving.
pub fn chunks_processed(chunks: &[Chunk]) -> bool {
    let Some(first) = chunks.first() else {
        return false;
    };
    let all_finished = chunks.iter().all(Chunk::is_finished);
    all_finished && first.chunk_count as usize == chunks.len()
}

/// Unfinished chunks exist and the latest finish is older than the threshold.
///
/// When nothing has finished yet the job is not considered stuck, however
/// old its unfinished chunks are.
pub fn chunks_stuck(chunks: &[Chunk], now: f64, threshold_secs: f64) -> bool {
    if chunks.iter().all(Chunk::is_finished) {
        return false;
    }
    chunks
        .iter()
        .filter(|chunk| chunk.is_finished())
        .map(|chunk| chunk.finished_at)
        .max_by(f64::total_cmp)
        .is_some_and(|latest| now - latest > threshold_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn chunk(job_id: JobId, count: u32, started: f64, finished: f64) -> Chunk {
        Chunk {
            id: ChunkId::new(),
            job_id,
            chunk_key: ChunkKey::from(Uuid::new_v4().to_string()),
            instance_id: None,
            filename: "hash/input-00000000.mgf".into(),
            parameter_filename: "hash/parameters.conf".into(),
            bytes: 128,
            chunk_count: count,
            sent_at: 1.0,
            started_at: started,
            finished_at: finished,
        }
    }

    #[test]
    fn processed_requires_all_finished_and_matching_count() {
        let job = JobId::new();
        assert!(!chunks_processed(&[]));

        let done = vec![chunk(job, 2, 1.0, 2.0), chunk(job, 2, 1.0, 3.0)];
        assert!(chunks_processed(&done));

        let unfinished = vec![chunk(job, 2, 1.0, 2.0), chunk(job, 2, 1.0, 0.0)];
        assert!(!chunks_processed(&unfinished));

        let still_arriving = vec![chunk(job, 3, 1.0, 2.0), chunk(job, 3, 1.0, 3.0)];
        assert!(!chunks_processed(&still_arriving));
    }

    #[test]
    fn stuck_when_latest_finish_is_old() {
        let job = JobId::new();
        let chunks = vec![
            chunk(job, 3, 10.0, 100.0),
            chunk(job, 3, 10.0, 200.0),
            chunk(job, 3, 10.0, 0.0),
        ];
        assert!(chunks_stuck(&chunks, 1_401.0, 1200.0));
        assert!(!chunks_stuck(&chunks, 1_300.0, 1200.0));
    }

    #[test]
    fn not_stuck_when_all_finished_or_none_finished() {
        let job = JobId::new();
        let finished = vec![chunk(job, 1, 10.0, 20.0)];
        assert!(!chunks_stuck(&finished, 1e9, 1200.0));

        let none_finished = vec![chunk(job, 2, 10.0, 0.0), chunk(job, 2, 0.0, 0.0)];
        assert!(!chunks_stuck(&none_finished, 1e9, 1200.0));

        assert!(!chunks_stuck(&[], 1e9, 1200.0));
    }

    #[test]
    fn finish_never_moves_backward() {
        let mut c = chunk(JobId::new(), 1, 10.0, 0.0);
        assert!(c.record_finish("i-1", 50.0));
        assert!(!c.record_finish("i-1", 50.0));
        assert!(!c.record_finish("i-1", 40.0));
        assert_eq!(c.finished_at, 50.0);
        assert!(c.record_finish("i-2", 60.0));
        assert_eq!(c.finished_at, 60.0);
    }

    #[test]
    fn finish_is_clamped_to_start() {
        let mut c = chunk(JobId::new(), 1, 100.0, 0.0);
        assert!(c.record_finish("i-1", 90.0));
        assert_eq!(c.finished_at, 100.0);
        assert_eq!(c.duration(), Some(0.0));
    }

    #[test]
    fn start_after_finish_is_ignored() {
        let mut c = chunk(JobId::new(), 1, 0.0, 0.0);
        assert!(c.record_start("i-1", 10.0));
        assert_eq!(c.instance_id.as_deref(), Some("i-1"));
        assert!(c.record_finish("i-1", 20.0));
        assert!(!c.record_start("i-2", 30.0));
        assert_eq!(c.started_at, 10.0);
        assert_eq!(c.instance_id.as_deref(), Some("i-1"));
    }

    #[test]
    fn chunk_keys_follow_the_object_key() {
        let a = ChunkKey::derive("hash/input-00000000.mgf");
        assert_eq!(a, ChunkKey::derive("hash/input-00000000.mgf"));
        assert_ne!(a, ChunkKey::derive("hash/input-00000001.mgf"));
        assert_ne!(a, ChunkKey::derive("other/input-00000000.mgf"));
        assert_eq!(a.as_str().len(), 64);
    }
}
