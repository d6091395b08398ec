//! Job storage abstractions and the in-memory implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use jobloom_core::{Entity, JobId, JobTypeId};
use jobloom_jobs::{
    ActiveState, Job, JobForProcessing, JobHistoryEntry, JobStatus, JobType, StatusChange,
};

/// Durable table of jobs.
///
/// Every status write is conditional on the expected prior status, so racing
/// workers cannot both move the same job.
pub trait JobRepository: Send + Sync {
    /// Persist a new job.
    fn insert_job(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Get a job by ID.
    fn find_job(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Active open jobs of a type, earliest first.
    fn jobs_for_processing(
        &self,
        job_type_id: JobTypeId,
        limit: usize,
    ) -> Result<Vec<JobForProcessing>, JobStoreError>;

    /// Atomically move an open job with attempts left to `Processing`,
    /// incrementing its attempt counter.
    ///
    /// Returns `None` if the job is not open, not active, of another type, or
    /// has no attempts left.
    fn claim_job(
        &self,
        id: JobId,
        job_type_id: JobTypeId,
        max_retries: u32,
    ) -> Result<Option<Job>, JobStoreError>;

    /// Apply a status compare-and-swap. Returns `None` if the job was not in
    /// the expected status.
    fn transition_job(&self, id: JobId, change: StatusChange) -> Result<Option<Job>, JobStoreError>;
}

/// Durable table of job types.
pub trait JobTypeRepository: Send + Sync {
    fn insert_job_type(&self, job_type: &JobType) -> Result<(), JobStoreError>;

    fn find_job_type(&self, id: JobTypeId) -> Result<Option<JobType>, JobStoreError>;

    fn find_job_type_by_name(&self, name: &str) -> Result<Option<JobType>, JobStoreError>;

    /// All job types ordered by name.
    fn list_job_types(&self) -> Result<Vec<JobType>, JobStoreError>;
}

/// Append-only job history log.
pub trait JobHistoryRepository: Send + Sync {
    fn append_history(&self, entry: &JobHistoryEntry) -> Result<(), JobStoreError>;

    /// Entries for one job in creation order.
    fn history_for_job(&self, job_id: JobId) -> Result<Vec<JobHistoryEntry>, JobStoreError>;
}

/// Everything the job engine needs from persistence.
pub trait JobStore: JobRepository + JobTypeRepository + JobHistoryRepository {}

impl<T> JobStore for T where T: JobRepository + JobTypeRepository + JobHistoryRepository + ?Sized {}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("record already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<BTreeMap<JobId, Job>>,
    job_types: RwLock<BTreeMap<JobTypeId, JobType>>,
    history: RwLock<Vec<JobHistoryEntry>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Snapshot of every job, in id order. Handy for assertions.
    pub fn all_jobs(&self) -> Result<Vec<Job>, JobStoreError> {
        Ok(read(&self.jobs)?.values().cloned().collect())
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, JobStoreError> {
    lock.read()
        .map_err(|_| JobStoreError::Storage("in-memory store lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, JobStoreError> {
    lock.write()
        .map_err(|_| JobStoreError::Storage("in-memory store lock poisoned".to_string()))
}

fn insert_new<E: Entity + Clone>(
    table: &mut BTreeMap<E::Id, E>,
    record: &E,
) -> Result<(), JobStoreError> {
    if table.contains_key(&record.id()) {
        return Err(JobStoreError::AlreadyExists(format!("{:?}", record.id())));
    }
    table.insert(record.id(), record.clone());
    Ok(())
}

impl JobRepository for InMemoryJobStore {
    fn insert_job(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = write(&self.jobs)?;
        let mut stored = job.clone();
        let now = Utc::now();
        stored.created_at = now;
        stored.updated_at = now;
        insert_new(&mut jobs, &stored)
    }

    fn find_job(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(read(&self.jobs)?.get(&id).cloned())
    }

    fn jobs_for_processing(
        &self,
        job_type_id: JobTypeId,
        limit: usize,
    ) -> Result<Vec<JobForProcessing>, JobStoreError> {
        let jobs = read(&self.jobs)?;
        let mut candidates: Vec<&Job> = jobs
            .values()
            .filter(|j| {
                j.job_type_id == job_type_id
                    && j.status == JobStatus::Open
                    && j.active_state == ActiveState::Active
            })
            .collect();

        // FIFO, with the time-ordered id as tie breaker
        candidates.sort_by_key(|j| (j.created_at, j.id));
        Ok(candidates
            .into_iter()
            .take(limit)
            .map(JobForProcessing::from)
            .collect())
    }

    fn claim_job(
        &self,
        id: JobId,
        job_type_id: JobTypeId,
        max_retries: u32,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = write(&self.jobs)?;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };

        let claimable = job.job_type_id == job_type_id
            && job.status == JobStatus::Open
            && job.active_state == ActiveState::Active
            && job.attempt < max_retries;
        if !claimable {
            return Ok(None);
        }

        job.status = JobStatus::Processing;
        job.attempt += 1;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    fn transition_job(&self, id: JobId, change: StatusChange) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = write(&self.jobs)?;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| JobStoreError::NotFound(format!("job {id}")))?;

        if !change.applies_to(job) {
            return Ok(None);
        }
        change.apply(job, Utc::now());
        Ok(Some(job.clone()))
    }
}

impl JobTypeRepository for InMemoryJobStore {
    fn insert_job_type(&self, job_type: &JobType) -> Result<(), JobStoreError> {
        let mut job_types = write(&self.job_types)?;
        if job_types.values().any(|t| t.name == job_type.name) {
            return Err(JobStoreError::AlreadyExists(format!(
                "job type named `{}`",
                job_type.name
            )));
        }
        insert_new(&mut job_types, job_type)
    }

    fn find_job_type(&self, id: JobTypeId) -> Result<Option<JobType>, JobStoreError> {
        Ok(read(&self.job_types)?.get(&id).cloned())
    }

    fn find_job_type_by_name(&self, name: &str) -> Result<Option<JobType>, JobStoreError> {
        Ok(read(&self.job_types)?
            .values()
            .find(|t| t.name == name)
            .cloned())
    }

    fn list_job_types(&self) -> Result<Vec<JobType>, JobStoreError> {
        let mut job_types: Vec<JobType> = read(&self.job_types)?.values().cloned().collect();
        job_types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(job_types)
    }
}

impl JobHistoryRepository for InMemoryJobStore {
    fn append_history(&self, entry: &JobHistoryEntry) -> Result<(), JobStoreError> {
        write(&self.history)?.push(entry.clone());
        Ok(())
    }

    fn history_for_job(&self, job_id: JobId) -> Result<Vec<JobHistoryEntry>, JobStoreError> {
        Ok(read(&self.history)?
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect())
    }
}
