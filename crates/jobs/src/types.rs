//! Job records, statuses and the history log entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use jobloom_core::{DomainError, DomainResult, Entity, HistoryEntryId, JobId, JobTypeId};

use crate::job_type::JobType;

/// Lifecycle status of a job.
///
/// The numeric codes are the persisted representation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed
    Open,
    /// Claimed by a worker, handler running
    Processing,
    /// Failed with no attempts left
    Failed,
    /// Completed successfully
    Finished,
    /// Handler reported an unrecoverable error
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown job status code: {0}")]
pub struct UnknownStatusCode(pub i16);

impl JobStatus {
    pub const fn code(self) -> i16 {
        match self {
            JobStatus::Open => 0,
            JobStatus::Processing => 100,
            JobStatus::Failed => 400,
            JobStatus::Finished => 500,
            JobStatus::Error => 666,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, UnknownStatusCode> {
        match code {
            0 => Ok(JobStatus::Open),
            100 => Ok(JobStatus::Processing),
            400 => Ok(JobStatus::Failed),
            500 => Ok(JobStatus::Finished),
            666 => Ok(JobStatus::Error),
            other => Err(UnknownStatusCode(other)),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed | JobStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Open => "Open",
            JobStatus::Processing => "Processing",
            JobStatus::Failed => "Failed",
            JobStatus::Finished => "Finished",
            JobStatus::Error => "Error",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Soft-delete / lifecycle flag, independent of [`JobStatus`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveState {
    #[default]
    Active,
    Inactive,
    Deleted,
    PermanentDeletionRequested,
}

impl ActiveState {
    pub const fn code(self) -> i16 {
        match self {
            ActiveState::Active => 100,
            ActiveState::Inactive => 200,
            ActiveState::Deleted => 300,
            ActiveState::PermanentDeletionRequested => 666,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            100 => Some(ActiveState::Active),
            200 => Some(ActiveState::Inactive),
            300 => Some(ActiveState::Deleted),
            666 => Some(ActiveState::PermanentDeletionRequested),
            _ => None,
        }
    }
}

/// One unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type_id: JobTypeId,
    /// Handler-specific input
    pub payload: JsonValue,
    /// Execution hints
    pub parameter: JsonValue,
    pub status: JobStatus,
    /// Number of claims so far (starts at 0)
    pub attempt: u32,
    pub active_state: ActiveState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new, open job that has never been claimed.
    pub fn new(job_type_id: JobTypeId, payload: JsonValue, parameter: JsonValue) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type_id,
            payload,
            parameter,
            status: JobStatus::Open,
            attempt: 0,
            active_state: ActiveState::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Payload and parameter must both be structured (object or array).
    pub fn validate(&self) -> DomainResult<()> {
        if !is_structured(&self.payload) {
            return Err(DomainError::validation("job payload must be a JSON object or array"));
        }
        if !is_structured(&self.parameter) {
            return Err(DomainError::validation("job parameter must be a JSON object or array"));
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.status == JobStatus::Open
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn has_attempts_left(&self, job_type: &JobType) -> bool {
        self.attempt < job_type.max_retries
    }
}

impl Entity for Job {
    type Id = JobId;

    fn id(&self) -> JobId {
        self.id
    }
}

pub(crate) fn is_structured(value: &JsonValue) -> bool {
    matches!(value, JsonValue::Object(_) | JsonValue::Array(_))
}

/// How a conditional status write changes the attempt counter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AttemptChange {
    Keep,
    Decrement,
}

/// A compare-and-swap on a job's status.
///
/// Stores apply the change only if the job is currently in `expected`; this is
/// what keeps two workers from both moving the same job out of a state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub expected: JobStatus,
    pub next: JobStatus,
    pub attempt: AttemptChange,
}

impl StatusChange {
    pub fn new(expected: JobStatus, next: JobStatus) -> Self {
        Self {
            expected,
            next,
            attempt: AttemptChange::Keep,
        }
    }

    pub fn decrementing_attempt(mut self) -> Self {
        self.attempt = AttemptChange::Decrement;
        self
    }

    pub fn applies_to(&self, job: &Job) -> bool {
        job.status == self.expected
    }

    /// Apply the change to an in-memory record whose status already matched.
    pub fn apply(&self, job: &mut Job, now: DateTime<Utc>) {
        job.status = self.next;
        if self.attempt == AttemptChange::Decrement {
            job.attempt = job.attempt.saturating_sub(1);
        }
        job.updated_at = now;
    }
}

/// Read-model row: an active, open job eligible for claiming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobForProcessing {
    pub job_id: JobId,
    pub job_type_id: JobTypeId,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl From<&Job> for JobForProcessing {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            job_type_id: job.job_type_id,
            attempt: job.attempt,
            created_at: job.created_at,
        }
    }
}

/// Append-only audit row describing one transition of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHistoryEntry {
    pub id: HistoryEntryId,
    pub job_id: JobId,
    pub message: String,
    pub additional_data: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

impl JobHistoryEntry {
    pub fn new(job_id: JobId, message: impl Into<String>, additional_data: Option<JsonValue>) -> Self {
        Self {
            id: HistoryEntryId::new(),
            job_id,
            message: message.into(),
            additional_data,
            created_at: Utc::now(),
        }
    }
}
