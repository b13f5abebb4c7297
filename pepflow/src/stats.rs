use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::chunk::Chunk;
use crate::job::{Job, JobStatus, SearcherKind};

#[derive(Debug, Error, PartialEq)]
pub enum AggregateError {
    #[error("no chunk has both start and finish recorded")]
    NoTimedChunks,
    #[error("aggregate is not a finite number")]
    NotFinite,
}

fn finite(value: f64) -> Result<f64, AggregateError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AggregateError::NotFinite)
    }
}

fn durations(chunks: &[Chunk]) -> Result<Vec<f64>, AggregateError> {
    let durations: Vec<f64> = chunks.iter().filter_map(Chunk::duration).collect();
    if durations.is_empty() {
        return Err(AggregateError::NoTimedChunks);
    }
    Ok(durations)
}

pub fn try_minimum_chunk_time(chunks: &[Chunk]) -> Result<f64, AggregateError> {
    let min = durations(chunks)?.into_iter().fold(f64::INFINITY, f64::min);
    finite(min)
}

pub fn try_maximum_chunk_time(chunks: &[Chunk]) -> Result<f64, AggregateError> {
    let max = durations(chunks)?
        .into_iter()
        .fold(f64::NEG_INFINITY, f64::max);
    finite(max)
}

pub fn try_average_chunk_time(chunks: &[Chunk]) -> Result<f64, AggregateError> {
    let durations = durations(chunks)?;
    let total: f64 = durations.iter().sum();
    finite(total / durations.len() as f64)
}

/// Wall-clock span from the earliest start to the latest finish.
pub fn try_processing_time(chunks: &[Chunk]) -> Result<f64, AggregateError> {
    let timed: Vec<&Chunk> = chunks
        .iter()
        .filter(|chunk| chunk.duration().is_some())
        .collect();
    if timed.is_empty() {
        return Err(AggregateError::NoTimedChunks);
    }
    let first_start = timed
        .iter()
        .map(|chunk| chunk.started_at)
        .fold(f64::INFINITY, f64::min);
    let last_finish = timed
        .iter()
        .map(|chunk| chunk.finished_at)
        .fold(f64::NEG_INFINITY, f64::max);
    finite(last_finish - first_start)
}

/// Any aggregate that cannot be computed reports as zero; results are never
/// negative.
fn or_zero(result: Result<f64, AggregateError>) -> f64 {
    result.unwrap_or(0.0).max(0.0)
}

/// Chunk timings for a job with the zero default applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ChunkTimings {
    pub minimum_chunk_time: f64,
    pub maximum_chunk_time: f64,
    pub average_chunk_time: f64,
    pub processing_time: f64,
}

impl ChunkTimings {
    pub fn from_chunks(chunks: &[Chunk]) -> Self {
        Self {
            minimum_chunk_time: or_zero(try_minimum_chunk_time(chunks)),
            maximum_chunk_time: or_zero(try_maximum_chunk_time(chunks)),
            average_chunk_time: or_zero(try_average_chunk_time(chunks)),
            processing_time: or_zero(try_processing_time(chunks)),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ChunkStatistics {
    pub chunk_key: String,
    pub instance_id: Option<String>,
    pub bytes: u64,
    pub sent_at: f64,
    pub started_at: f64,
    pub finished_at: f64,
}

impl From<&Chunk> for ChunkStatistics {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_key: chunk.chunk_key.to_string(),
            instance_id: chunk.instance_id.clone(),
            bytes: chunk.bytes,
            sent_at: chunk.sent_at,
            started_at: chunk.started_at,
            finished_at: chunk.finished_at,
        }
    }
}

/// Payload submitted to the statistics endpoint for a finished job.
#[derive(Clone, Debug, Serialize)]
pub struct JobStatistics {
    pub hash_key: String,
    pub name: String,
    pub searcher: SearcherKind,
    pub status: JobStatus,
    pub spectra_count: u32,
    pub launched_at: f64,
    pub started_pack_at: f64,
    pub finished_at: f64,
    #[serde(flatten)]
    pub timings: ChunkTimings,
    pub search_parameters: BTreeMap<String, String>,
    pub chunks: Vec<ChunkStatistics>,
}

impl JobStatistics {
    pub fn collect(
        job: &Job,
        chunks: &[Chunk],
        search_parameters: BTreeMap<String, String>,
    ) -> Self {
        Self {
            hash_key: job.hash_key().to_string(),
            name: job.name.clone(),
            searcher: job.searcher,
            status: job.status,
            spectra_count: job.spectra_count,
            launched_at: job.launched_at,
            started_pack_at: job.started_pack_at,
            finished_at: job.finished_at,
            timings: ChunkTimings::from_chunks(chunks),
            search_parameters,
            chunks: chunks.iter().map(ChunkStatistics::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkId, ChunkKey};
    use crate::job::JobId;

    fn timed(started: f64, finished: f64) -> Chunk {
        Chunk {
            id: ChunkId::new(),
            job_id: JobId::new(),
            chunk_key: ChunkKey::from(format!("{started}-{finished}")),
            instance_id: Some("i-1".into()),
            filename: "k/input-00000000.mgf".into(),
            parameter_filename: "k/parameters.conf".into(),
            bytes: 10,
            chunk_count: 3,
            sent_at: 1.0,
            started_at: started,
            finished_at: finished,
        }
    }

    #[test]
    fn timings_are_ordered() {
        let chunks = vec![timed(10.0, 14.0), timed(11.0, 21.0), timed(12.0, 18.0)];
        let timings = ChunkTimings::from_chunks(&chunks);
        assert_eq!(timings.minimum_chunk_time, 4.0);
        assert_eq!(timings.maximum_chunk_time, 10.0);
        assert!((timings.average_chunk_time - 20.0 / 3.0).abs() < 1e-9);
        assert_eq!(timings.processing_time, 11.0);
        assert!(timings.minimum_chunk_time <= timings.average_chunk_time);
        assert!(timings.average_chunk_time <= timings.maximum_chunk_time);
    }

    #[test]
    fn empty_or_untimed_chunks_default_to_zero() {
        assert_eq!(ChunkTimings::from_chunks(&[]), ChunkTimings::default());
        assert_eq!(
            try_average_chunk_time(&[timed(10.0, 0.0)]),
            Err(AggregateError::NoTimedChunks)
        );
        assert_eq!(
            ChunkTimings::from_chunks(&[timed(10.0, 0.0), timed(0.0, 0.0)]),
            ChunkTimings::default()
        );
    }

    #[test]
    fn untimed_chunks_are_ignored() {
        let chunks = vec![timed(10.0, 15.0), timed(0.0, 0.0)];
        let timings = ChunkTimings::from_chunks(&chunks);
        assert_eq!(timings.minimum_chunk_time, 5.0);
        assert_eq!(timings.processing_time, 5.0);
    }
}
