//! Wire shapes exchanged over the `head` and `node` queues.
//!
//! Bodies are JSON objects tagged by a `type` field. Tags outside the known
//! set decode to an `Unknown` variant so a loop can drop them without
//! treating them as malformed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunk::ChunkKey;
use crate::error::PipelineError;
use crate::job::{HashKey, JobId, SearcherKind};
use crate::queue::QueueName;

/// Closed set of message type tags.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MessageType {
    Created,
    Start,
    Finish,
    BackgroundUpload,
    ProcessDatabase,
    ProcessDatafile,
    SendStatistics,
    JobUnpacking,
    JobUnpacked,
    JobPacking,
    JobPacked,
    Unpack,
    Process,
    Pack,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Created => "created",
            MessageType::Start => "start",
            MessageType::Finish => "finish",
            MessageType::BackgroundUpload => "background-upload",
            MessageType::ProcessDatabase => "process-database",
            MessageType::ProcessDatafile => "process-datafile",
            MessageType::SendStatistics => "send-statistics",
            MessageType::JobUnpacking => "job-unpacking",
            MessageType::JobUnpacked => "job-unpacked",
            MessageType::JobPacking => "job-packing",
            MessageType::JobPacked => "job-packed",
            MessageType::Unpack => "unpack",
            MessageType::Process => "process",
            MessageType::Pack => "pack",
        }
    }

    /// Queue a message of this type is delivered on.
    pub fn queue(&self) -> QueueName {
        match self {
            MessageType::Unpack | MessageType::Process | MessageType::Pack => QueueName::Node,
            _ => QueueName::Head,
        }
    }
}

/// Announcement of one uploaded chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkCreated {
    pub chunk_count: u32,
    pub bytes: u64,
    pub sendtime: f64,
    pub chunk_key: ChunkKey,
    pub job_id: JobId,
    pub object_key: String,
    pub parameter_object_key: String,
    pub bucket: String,
    pub searcher: SearcherKind,
}

/// A worker's `start` or `finish` report for a chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkProgress {
    pub job_id: JobId,
    pub chunk_key: ChunkKey,
    pub instance_id: String,
    pub timestamp: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRef {
    pub job_id: JobId,
}

/// Everything a node needs to unpack or pack a job without lookups.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub bucket: String,
    pub job_id: JobId,
    pub hash_key: HashKey,
    pub input_ref: String,
    pub result_filename: String,
    pub searcher: SearcherKind,
    pub database: String,
    pub spectra_count: u32,
    pub priority: u32,
}

/// Request to run the search over one chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkRequest {
    pub job_id: JobId,
    pub chunk_key: ChunkKey,
    pub object_key: String,
    pub parameter_object_key: String,
    pub bucket: String,
    pub searcher: SearcherKind,
    pub hash_key: HashKey,
    pub priority: u32,
}

/// Messages consumed by the head-side dispatcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HeadMessage {
    Created(ChunkCreated),
    Start(ChunkProgress),
    Finish(ChunkProgress),
    BackgroundUpload(JobRef),
    ProcessDatabase { database_id: Uuid },
    ProcessDatafile { datafile_id: Uuid },
    SendStatistics(JobRef),
    JobUnpacking(JobRef),
    JobUnpacked(JobRef),
    JobPacking(JobRef),
    JobPacked(JobRef),
    #[serde(other)]
    Unknown,
}

impl HeadMessage {
    pub fn decode(body: &str) -> Result<Self, PipelineError> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn encode(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> Option<MessageType> {
        Some(match self {
            HeadMessage::Created(_) => MessageType::Created,
            HeadMessage::Start(_) => MessageType::Start,
            HeadMessage::Finish(_) => MessageType::Finish,
            HeadMessage::BackgroundUpload(_) => MessageType::BackgroundUpload,
            HeadMessage::ProcessDatabase { .. } => MessageType::ProcessDatabase,
            HeadMessage::ProcessDatafile { .. } => MessageType::ProcessDatafile,
            HeadMessage::SendStatistics(_) => MessageType::SendStatistics,
            HeadMessage::JobUnpacking(_) => MessageType::JobUnpacking,
            HeadMessage::JobUnpacked(_) => MessageType::JobUnpacked,
            HeadMessage::JobPacking(_) => MessageType::JobPacking,
            HeadMessage::JobPacked(_) => MessageType::JobPacked,
            HeadMessage::Unknown => return None,
        })
    }

    /// Job the message concerns, when it names one directly.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            HeadMessage::Created(created) => Some(created.job_id),
            HeadMessage::Start(progress) | HeadMessage::Finish(progress) => {
                Some(progress.job_id)
            }
            HeadMessage::BackgroundUpload(job)
            | HeadMessage::SendStatistics(job)
            | HeadMessage::JobUnpacking(job)
            | HeadMessage::JobUnpacked(job)
            | HeadMessage::JobPacking(job)
            | HeadMessage::JobPacked(job) => Some(job.job_id),
            HeadMessage::ProcessDatabase { .. }
            | HeadMessage::ProcessDatafile { .. }
            | HeadMessage::Unknown => None,
        }
    }
}

/// Work requests consumed by node workers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NodeMessage {
    Unpack(WorkRequest),
    Process(ChunkRequest),
    Pack(WorkRequest),
    #[serde(other)]
    Unknown,
}

impl NodeMessage {
    pub fn decode(body: &str) -> Result<Self, PipelineError> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn encode(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> Option<MessageType> {
        match self {
            NodeMessage::Unpack(_) => Some(MessageType::Unpack),
            NodeMessage::Process(_) => Some(MessageType::Process),
            NodeMessage::Pack(_) => Some(MessageType::Pack),
            NodeMessage::Unknown => None,
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        match self {
            NodeMessage::Unpack(request) | NodeMessage::Pack(request) => Some(request.job_id),
            NodeMessage::Process(request) => Some(request.job_id),
            NodeMessage::Unknown => None,
        }
    }
}
