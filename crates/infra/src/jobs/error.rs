//! Errors raised by the job services and the worker loop.

use thiserror::Error;

use jobloom_core::{DomainError, JobId, JobTypeId};
use jobloom_jobs::{JobStatus, RegistryError};

use super::store::JobStoreError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] JobStoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    #[error("job {job_id} belongs to job type {actual}, not {expected}")]
    JobTypeMismatch {
        job_id: JobId,
        expected: JobTypeId,
        actual: JobTypeId,
    },

    /// A conditional status write found the job in another state.
    #[error("job {job_id} was expected to be {expected} but is {found}")]
    InvalidTransition {
        job_id: JobId,
        expected: JobStatus,
        found: JobStatus,
    },

    #[error("failed to start handler thread: {0}")]
    HandlerThread(#[source] std::io::Error),
}

impl JobError {
    pub fn unknown_job_type(reference: impl Into<String>) -> Self {
        Self::UnknownJobType(reference.into())
    }
}
