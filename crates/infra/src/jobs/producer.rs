//! Job producer: validates and enqueues new jobs.

use std::sync::Arc;

use serde_json::{Value as JsonValue, json};
use tracing::{debug, warn};

use jobloom_jobs::{Job, JobType};

use super::error::JobError;
use super::history::JobHistory;
use super::store::{JobHistoryRepository, JobRepository};

pub const MESSAGE_CREATED: &str = "The job has been created";

pub struct JobProducer<S> {
    store: Arc<S>,
    history: JobHistory<S>,
}

impl<S> Clone for JobProducer<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            history: self.history.clone(),
        }
    }
}

impl<S: JobRepository + JobHistoryRepository> JobProducer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            history: JobHistory::new(store.clone()),
            store,
        }
    }

    /// Create an open job of `job_type` and record its creation.
    pub fn try_add_job(
        &self,
        job_type: &JobType,
        payload: JsonValue,
        parameter: JsonValue,
    ) -> Result<Job, JobError> {
        self.enqueue(Job::new(job_type.id, payload, parameter), None)
    }

    /// Like [`Self::try_add_job`], but logs the failure and returns `None`.
    pub fn add_job(&self, job_type: &JobType, payload: JsonValue, parameter: JsonValue) -> Option<Job> {
        match self.try_add_job(job_type, payload, parameter) {
            Ok(job) => Some(job),
            Err(e) => {
                warn!(job_type = %job_type.name, error = %e, "failed to add job");
                None
            }
        }
    }

    /// Enqueue a fresh copy of `source` with the attempt counter reset.
    pub(crate) fn add_restarted_job(&self, source: &Job) -> Result<Job, JobError> {
        let job = Job::new(source.job_type_id, source.payload.clone(), source.parameter.clone());
        self.enqueue(job, Some(json!({ "restarted_from": source.id.to_string() })))
    }

    fn enqueue(&self, job: Job, history_data: Option<JsonValue>) -> Result<Job, JobError> {
        job.validate()?;
        self.store.insert_job(&job)?;
        debug!(job_id = %job.id, job_type_id = %job.job_type_id, "job created");
        self.history.log(&job, MESSAGE_CREATED, history_data);
        Ok(job)
    }
}
