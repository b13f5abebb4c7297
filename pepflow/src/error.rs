use thiserror::Error;

use crate::job::JobStatus;
use crate::object_store::ObjectStoreError;

/// Failures that carry meaning for the control loops.
///
/// Collaborators and handlers return `anyhow::Result`; these variants are
/// placed in the chain so the loops can classify a failure with
/// [`is_non_retryable`] and decide whether to acknowledge the message.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A job is missing a required field or carries an invalid value.
    #[error("{field} is required: {reason}")]
    Validation {
        field: &'static str,
        reason: &'static str,
    },

    /// A referenced entity could not be resolved.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A status change would move a job backwards.
    #[error("job status cannot move from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// A message body could not be decoded into a known shape.
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    /// No search configuration loader is registered for a searcher.
    #[error("no search configuration loader registered for {0}")]
    UnregisteredSearcher(String),
}

impl PipelineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Whether retrying the message that produced `err` can never succeed.
///
/// A permanently missing backing object or an undecodable body would be
/// redelivered forever, so the loops acknowledge such messages.
pub fn is_non_retryable(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<ObjectStoreError>(),
            Some(ObjectStoreError::NoSuchKey(_))
        ) || matches!(
            cause.downcast_ref::<PipelineError>(),
            Some(PipelineError::Decode(_))
        )
    })
}

/// Whether `err` reports an unresolved entity.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<PipelineError>(),
            Some(PipelineError::NotFound { .. })
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn missing_object_is_non_retryable_through_context() {
        let err: anyhow::Result<()> =
            Err(ObjectStoreError::NoSuchKey("abc/input.mgf".into()).into());
        let err = err.context("downloading input").unwrap_err();
        assert!(is_non_retryable(&err));
        assert!(!is_not_found(&err));
    }

    #[test]
    fn backend_failure_is_retryable() {
        let err = anyhow::Error::from(ObjectStoreError::Backend("timeout".into()));
        assert!(!is_non_retryable(&err));
    }

    #[test]
    fn decode_failure_is_non_retryable() {
        let decode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = anyhow::Error::from(PipelineError::from(decode));
        assert!(is_non_retryable(&err));
    }

    #[test]
    fn not_found_is_detected() {
        let err = anyhow::Error::from(PipelineError::not_found("job", 42));
        assert!(is_not_found(&err));
        assert_eq!(err.to_string(), "job not found: 42");
    }
}
