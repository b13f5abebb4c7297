use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{PipelineError, Result};

/// Seconds since the Unix epoch with sub-second precision.
pub fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

pub fn epoch_now() -> f64 {
    epoch_seconds(Utc::now())
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Search engine a job runs under.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearcherKind {
    Omssa,
    Tandem,
}

impl SearcherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearcherKind::Omssa => "omssa",
            SearcherKind::Tandem => "tandem",
        }
    }
}

impl FromStr for SearcherKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "omssa" => Ok(SearcherKind::Omssa),
            "tandem" => Ok(SearcherKind::Tandem),
            _ => Err(format!("Invalid searcher: {}", s)),
        }
    }
}

impl Display for SearcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job lifecycle states in forward order.
///
/// A job never re-enters a state it has passed; `Complete` is terminal.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum JobStatus {
    Pending,
    Launching,
    Uploading,
    Unpacking,
    Processing,
    RequestedPacking,
    Packing,
    Complete,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Launching => "Launching",
            JobStatus::Uploading => "Uploading",
            JobStatus::Unpacking => "Unpacking",
            JobStatus::Processing => "Processing",
            JobStatus::RequestedPacking => "Requested packing",
            JobStatus::Packing => "Packing",
            JobStatus::Complete => "Complete",
        }
    }

    pub fn is_packing(&self) -> bool {
        matches!(self, JobStatus::RequestedPacking | JobStatus::Packing)
    }

    pub fn is_complete(&self) -> bool {
        *self == JobStatus::Complete
    }

    /// Returns the status a job moves to when asked to enter `next`.
    ///
    /// Re-entering the current state is allowed so redelivered signals stay
    /// harmless; any backward move is rejected.
    pub fn advance_to(self, next: JobStatus) -> Result<JobStatus> {
        if next < self {
            return Err(PipelineError::InvalidTransition {
                from: self,
                to: next,
            });
        }
        Ok(next)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(JobStatus::Pending),
            "Launching" => Ok(JobStatus::Launching),
            "Uploading" => Ok(JobStatus::Uploading),
            "Unpacking" => Ok(JobStatus::Unpacking),
            "Processing" => Ok(JobStatus::Processing),
            "Requested packing" => Ok(JobStatus::RequestedPacking),
            "Packing" => Ok(JobStatus::Packing),
            "Complete" => Ok(JobStatus::Complete),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque namespace key for a job's objects, fixed at creation.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct HashKey(String);

impl HashKey {
    /// Derives a fresh key from creation-time entropy.
    pub fn generate(created_at: DateTime<Utc>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(Uuid::new_v4().as_bytes());
        hasher.update(created_at.to_rfc3339().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for HashKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for HashKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Fields supplied when a job is submitted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub searcher: Option<SearcherKind>,
    pub parameter_file_id: Option<Uuid>,
    pub datafile_id: Option<Uuid>,
    pub spectra_count: Option<u32>,
    pub priority: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub searcher: SearcherKind,
    pub parameter_file_id: Uuid,
    pub datafile_id: Uuid,
    hash_key: HashKey,
    pub status: JobStatus,
    pub spectra_count: u32,
    pub priority: u32,
    pub created_at: DateTime<Utc>,
    pub launched_at: f64,
    pub started_pack_at: f64,
    pub finished_at: f64,
    pub statistics_sent: bool,
    pub link: Option<String>,
}

impl Job {
    /// Validates a submission and builds a `Pending` job.
    pub fn create(new: NewJob) -> Result<Self> {
        if new.name.trim().is_empty() {
            return Err(PipelineError::Validation {
                field: "name",
                reason: "must not be blank",
            });
        }
        let searcher = new.searcher.ok_or(PipelineError::Validation {
            field: "searcher",
            reason: "search method must be chosen",
        })?;
        let parameter_file_id = new.parameter_file_id.ok_or(PipelineError::Validation {
            field: "parameter_file_id",
            reason: "parameter file must be chosen",
        })?;
        let datafile_id = new.datafile_id.ok_or(PipelineError::Validation {
            field: "datafile_id",
            reason: "datafile must be chosen",
        })?;
        let spectra_count = match new.spectra_count {
            Some(count) if count > 0 => count,
            Some(_) => {
                return Err(PipelineError::Validation {
                    field: "spectra_count",
                    reason: "must be greater than zero",
                });
            }
            None => {
                return Err(PipelineError::Validation {
                    field: "spectra_count",
                    reason: "spectra count must be given",
                });
            }
        };
        let priority = new.priority.ok_or(PipelineError::Validation {
            field: "priority",
            reason: "priority must be given",
        })?;

        let created_at = Utc::now();
        Ok(Self {
            id: JobId::new(),
            name: new.name,
            searcher,
            parameter_file_id,
            datafile_id,
            hash_key: HashKey::generate(created_at),
            status: JobStatus::Pending,
            spectra_count,
            priority,
            created_at,
            launched_at: 0.0,
            started_pack_at: 0.0,
            finished_at: 0.0,
            statistics_sent: false,
            link: None,
        })
    }

    pub fn hash_key(&self) -> &HashKey {
        &self.hash_key
    }

    /// Moves the job forward, leaving it untouched on a backward request.
    pub fn advance(&mut self, next: JobStatus) -> Result<()> {
        self.status = self.status.advance_to(next)?;
        Ok(())
    }

    /// Packing was requested or started more than `threshold_secs` ago.
    pub fn stuck_packing(&self, now: f64, threshold_secs: f64) -> bool {
        self.status.is_packing() && now - self.started_pack_at > threshold_secs
    }
}

/// Lower-cases and strips everything outside `[0-9A-Za-z.-]`.
pub fn clean_name(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '-')
        .collect::<String>()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> NewJob {
        NewJob {
            name: "Liver digest".to_string(),
            searcher: Some(SearcherKind::Omssa),
            parameter_file_id: Some(Uuid::new_v4()),
            datafile_id: Some(Uuid::new_v4()),
            spectra_count: Some(200),
            priority: Some(100),
        }
    }

    #[test]
    fn create_sets_pending_and_hash_key() {
        let job = Job::create(submission()).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.hash_key().as_str().len(), 64);
        assert_eq!(job.launched_at, 0.0);
        assert!(job.link.is_none());
    }

    #[test]
    fn hash_keys_are_unique() {
        let a = Job::create(submission()).unwrap();
        let b = Job::create(submission()).unwrap();
        assert_ne!(a.hash_key(), b.hash_key());
    }

    #[test]
    fn create_rejects_missing_fields() {
        let cases: Vec<(NewJob, &str)> = vec![
            (NewJob { name: " ".into(), ..submission() }, "name"),
            (NewJob { searcher: None, ..submission() }, "searcher"),
            (NewJob { parameter_file_id: None, ..submission() }, "parameter_file_id"),
            (NewJob { datafile_id: None, ..submission() }, "datafile_id"),
            (NewJob { spectra_count: None, ..submission() }, "spectra_count"),
            (NewJob { spectra_count: Some(0), ..submission() }, "spectra_count"),
            (NewJob { priority: None, ..submission() }, "priority"),
        ];
        for (new, expected) in cases {
            match Job::create(new) {
                Err(PipelineError::Validation { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected validation error for {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn status_only_moves_forward() {
        assert_eq!(
            JobStatus::Unpacking.advance_to(JobStatus::Processing).unwrap(),
            JobStatus::Processing
        );
        assert_eq!(
            JobStatus::Packing.advance_to(JobStatus::Packing).unwrap(),
            JobStatus::Packing
        );
        assert!(JobStatus::Processing.advance_to(JobStatus::Unpacking).is_err());
        assert!(JobStatus::Complete.advance_to(JobStatus::Packing).is_err());
    }

    #[test]
    fn status_labels_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Launching,
            JobStatus::Uploading,
            JobStatus::Unpacking,
            JobStatus::Processing,
            JobStatus::RequestedPacking,
            JobStatus::Packing,
            JobStatus::Complete,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("cheese".parse::<JobStatus>().is_err());
    }

    #[test]
    fn stuck_packing_needs_packing_status_and_age() {
        let mut job = Job::create(submission()).unwrap();
        job.started_pack_at = 1_000.0;
        assert!(!job.stuck_packing(10_000.0, 1200.0));

        job.status = JobStatus::RequestedPacking;
        assert!(job.stuck_packing(10_000.0, 1200.0));
        assert!(!job.stuck_packing(2_000.0, 1200.0));

        job.status = JobStatus::Packing;
        assert!(job.stuck_packing(2_201.0, 1200.0));
    }

    #[test]
    fn clean_name_strips_and_lowercases() {
        assert_eq!(clean_name("Liver Digest_#2.v1-A"), "liverdigest2.v1-a");
    }
}
