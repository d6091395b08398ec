//! Job history service: the audit trail of every job transition.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::warn;

use jobloom_core::JobId;
use jobloom_jobs::{Job, JobHistoryEntry};

use super::error::JobError;
use super::store::JobHistoryRepository;

pub struct JobHistory<S> {
    store: Arc<S>,
}

impl<S> Clone for JobHistory<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: JobHistoryRepository> JobHistory<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Append an entry for `job`.
    ///
    /// History is best effort: a failed write is logged and `None` returned,
    /// the job transition that triggered it stands.
    pub fn log(
        &self,
        job: &Job,
        message: impl Into<String>,
        additional_data: Option<JsonValue>,
    ) -> Option<JobHistoryEntry> {
        let entry = JobHistoryEntry::new(job.id, message, additional_data);
        match self.store.append_history(&entry) {
            Ok(()) => Some(entry),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "failed to write job history");
                None
            }
        }
    }

    pub fn entries_for(&self, job_id: JobId) -> Result<Vec<JobHistoryEntry>, JobError> {
        Ok(self.store.history_for_job(job_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use jobloom_core::JobTypeId;
    use serde_json::json;

    #[test]
    fn log_appends_entry() {
        let store = InMemoryJobStore::arc();
        let history = JobHistory::new(store.clone());
        let job = Job::new(JobTypeId::new(), json!({}), json!({}));

        let entry = history
            .log(&job, "The job has been created", Some(json!({"by": "test"})))
            .unwrap();
        assert_eq!(entry.job_id, job.id);

        let entries = history.entries_for(job.id).unwrap();
        assert_eq!(entries, vec![entry]);
    }
}
