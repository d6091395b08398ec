//! Job consumer: the job state machine.
//!
//! ```text
//! Open --claim--> Processing
//! Processing --Success--> Finished
//! Processing --Failed, attempts left--> Open
//! Processing --Failed, exhausted--> Failed
//! Processing --Error--> Error
//! Processing --shutdown--> Open (attempt - 1)
//! ```
//!
//! Every write is a compare-and-swap on the prior status, so terminal jobs can
//! never be moved again.

use std::sync::Arc;

use tracing::{debug, info, warn};

use jobloom_core::JobId;
use jobloom_jobs::{
    HandlingResult, Job, JobForProcessing, JobStatus, JobType, ResultCode, StatusChange,
};

use super::error::JobError;
use super::history::JobHistory;
use super::producer::JobProducer;
use super::store::{JobHistoryRepository, JobRepository, JobStoreError};

pub const MESSAGE_SELECTED: &str = "The job has been selected for handling";
pub const MESSAGE_SUCCESS: &str = "Job completed successfully";
pub const MESSAGE_FAILED_RETRY: &str = "Job failed, retries left";
pub const MESSAGE_FAILED: &str = "Job failed";
pub const MESSAGE_ERROR: &str = "Job raised an error";
pub const MESSAGE_RESET: &str = "The job has been reset by a graceful shutdown";

pub struct JobConsumer<S> {
    store: Arc<S>,
    history: JobHistory<S>,
    producer: JobProducer<S>,
}

impl<S> Clone for JobConsumer<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            history: self.history.clone(),
            producer: self.producer.clone(),
        }
    }
}

impl<S: JobRepository + JobHistoryRepository> JobConsumer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            history: JobHistory::new(store.clone()),
            producer: JobProducer::new(store.clone()),
            store,
        }
    }

    pub fn get_job_by_id(&self, id: JobId) -> Result<Option<Job>, JobError> {
        Ok(self.store.find_job(id)?)
    }

    /// Candidate list of open, active jobs for `job_type`, earliest first.
    /// Nothing is claimed.
    pub fn get_jobs_for_processing_by_type(
        &self,
        job_type: &JobType,
        limit: usize,
    ) -> Result<Vec<JobForProcessing>, JobError> {
        Ok(self.store.jobs_for_processing(job_type.id, limit)?)
    }

    /// Claim a job: `Open` to `Processing`, attempt + 1.
    ///
    /// `None` means the job was taken by someone else, is no longer open or
    /// has exhausted its attempts. None of these is an error.
    pub fn get_job_for_handling(
        &self,
        job_id: JobId,
        job_type: &JobType,
    ) -> Result<Option<Job>, JobError> {
        let Some(job) = self
            .store
            .claim_job(job_id, job_type.id, job_type.max_retries)?
        else {
            debug!(job_id = %job_id, job_type = %job_type.name, "job not claimable");
            return Ok(None);
        };

        self.history.log(&job, MESSAGE_SELECTED, None);
        Ok(Some(job))
    }

    /// Apply a handler's result to a claimed job and record the outcome.
    pub fn process_job_handling_result(
        &self,
        job: &Job,
        job_type: &JobType,
        result: &HandlingResult,
    ) -> Result<Job, JobError> {
        if job.job_type_id != job_type.id {
            return Err(JobError::JobTypeMismatch {
                job_id: job.id,
                expected: job_type.id,
                actual: job.job_type_id,
            });
        }

        let (next, text) = match result.result_code {
            ResultCode::Success => (JobStatus::Finished, MESSAGE_SUCCESS),
            ResultCode::Failed if job.has_attempts_left(job_type) => {
                (JobStatus::Open, MESSAGE_FAILED_RETRY)
            }
            ResultCode::Failed => (JobStatus::Failed, MESSAGE_FAILED),
            ResultCode::Error => (JobStatus::Error, MESSAGE_ERROR),
        };

        let change = StatusChange::new(JobStatus::Processing, next);
        let updated = self.transition(job.id, change)?;

        let message = match &result.message {
            Some(msg) if !msg.is_empty() => format!("{text} : {msg}"),
            _ => text.to_string(),
        };
        self.history
            .log(&updated, message, result.additional_data.clone());

        match updated.status {
            JobStatus::Finished => info!(job_id = %updated.id, attempt = updated.attempt, "job finished"),
            status => warn!(
                job_id = %updated.id,
                attempt = updated.attempt,
                status = %status,
                reason = result.message.as_deref().unwrap_or(""),
                "job did not succeed"
            ),
        }
        Ok(updated)
    }

    /// Undo a claim: `Processing` back to `Open`, attempt - 1.
    ///
    /// Returns `None` if the job already left `Processing`.
    pub fn reset_job_to_open_by_graceful_shutdown(&self, job: &Job) -> Result<Option<Job>, JobError> {
        let change = StatusChange::new(JobStatus::Processing, JobStatus::Open).decrementing_attempt();
        let Some(reset) = self.store.transition_job(job.id, change)? else {
            debug!(job_id = %job.id, "job no longer processing, nothing to reset");
            return Ok(None);
        };

        self.history.log(&reset, MESSAGE_RESET, None);
        info!(job_id = %reset.id, attempt = reset.attempt, "job reset to open");
        Ok(Some(reset))
    }

    /// Queue a fresh copy of a finished self-restarting job.
    ///
    /// The source row is never touched; `None` if it has not reached a
    /// terminal status or the copy could not be stored.
    pub fn clone_to_restart_job(&self, job: &Job) -> Option<Job> {
        if !job.is_terminal() {
            warn!(job_id = %job.id, status = %job.status, "refusing to restart a non-terminal job");
            return None;
        }

        match self.producer.add_restarted_job(job) {
            Ok(copy) => {
                info!(job_id = %copy.id, source_job_id = %job.id, "job restarted");
                Some(copy)
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "failed to restart job");
                None
            }
        }
    }

    fn transition(&self, job_id: JobId, change: StatusChange) -> Result<Job, JobError> {
        if let Some(job) = self.store.transition_job(job_id, change)? {
            return Ok(job);
        }

        let current = self
            .store
            .find_job(job_id)?
            .ok_or_else(|| JobStoreError::NotFound(format!("job {job_id}")))?;
        Err(JobError::InvalidTransition {
            job_id,
            expected: change.expected,
            found: current.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use jobloom_jobs::{JobTypeMode, NewJobType};
    use proptest::prelude::*;
    use serde_json::json;

    struct Fixture {
        store: Arc<InMemoryJobStore>,
        consumer: JobConsumer<InMemoryJobStore>,
        producer: JobProducer<InMemoryJobStore>,
        job_type: JobType,
    }

    fn fixture(max_retries: u32, mode: JobTypeMode) -> Fixture {
        let store = InMemoryJobStore::arc();
        let job_type = NewJobType::new("reports", mode, "test.handler")
            .max_retries(max_retries)
            .build()
            .unwrap();
        Fixture {
            consumer: JobConsumer::new(store.clone()),
            producer: JobProducer::new(store.clone()),
            store,
            job_type,
        }
    }

    fn messages(store: &InMemoryJobStore, job_id: JobId) -> Vec<String> {
        store
            .history_for_job(job_id)
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn retry_then_terminal_failure() {
        let f = fixture(2, JobTypeMode::SingleShot);
        let job = f.producer.try_add_job(&f.job_type, json!({"n": 1}), json!({})).unwrap();
        assert_eq!((job.status, job.attempt), (JobStatus::Open, 0));

        let claimed = f.consumer.get_job_for_handling(job.id, &f.job_type).unwrap().unwrap();
        assert_eq!((claimed.status, claimed.attempt), (JobStatus::Processing, 1));

        let after = f
            .consumer
            .process_job_handling_result(&claimed, &f.job_type, &HandlingResult::failed("flaky"))
            .unwrap();
        assert_eq!((after.status, after.attempt), (JobStatus::Open, 1));

        let claimed = f.consumer.get_job_for_handling(job.id, &f.job_type).unwrap().unwrap();
        assert_eq!((claimed.status, claimed.attempt), (JobStatus::Processing, 2));

        let after = f
            .consumer
            .process_job_handling_result(&claimed, &f.job_type, &HandlingResult::failed("flaky"))
            .unwrap();
        assert_eq!((after.status, after.attempt), (JobStatus::Failed, 2));

        assert_eq!(
            messages(&f.store, job.id),
            vec![
                "The job has been created",
                "The job has been selected for handling",
                "Job failed, retries left : flaky",
                "The job has been selected for handling",
                "Job failed : flaky",
            ]
        );
    }

    #[test]
    fn success_and_error_are_terminal() {
        let f = fixture(5, JobTypeMode::SingleShot);
        for (result, status) in [
            (HandlingResult::success(), JobStatus::Finished),
            (HandlingResult::error("bad input"), JobStatus::Error),
        ] {
            let job = f.producer.try_add_job(&f.job_type, json!({}), json!({})).unwrap();
            let claimed = f.consumer.get_job_for_handling(job.id, &f.job_type).unwrap().unwrap();
            let done = f
                .consumer
                .process_job_handling_result(&claimed, &f.job_type, &result)
                .unwrap();
            assert_eq!(done.status, status);
            assert!(f.consumer.get_job_for_handling(job.id, &f.job_type).unwrap().is_none());
        }
    }

    #[test]
    fn additional_data_lands_in_history() {
        let f = fixture(5, JobTypeMode::SingleShot);
        let job = f.producer.try_add_job(&f.job_type, json!({}), json!({})).unwrap();
        let claimed = f.consumer.get_job_for_handling(job.id, &f.job_type).unwrap().unwrap();
        let result = HandlingResult::success().with_additional_data(json!({"rows": 3}));
        f.consumer
            .process_job_handling_result(&claimed, &f.job_type, &result)
            .unwrap();

        let last = f.store.history_for_job(job.id).unwrap().pop().unwrap();
        assert_eq!(last.message, MESSAGE_SUCCESS);
        assert_eq!(last.additional_data, Some(json!({"rows": 3})));
    }

    #[test]
    fn exhausted_job_is_never_claimable() {
        let f = fixture(2, JobTypeMode::SingleShot);
        let mut job = Job::new(f.job_type.id, json!({}), json!({}));
        job.attempt = 2;
        f.store.insert_job(&job).unwrap();

        assert!(f.consumer.get_job_for_handling(job.id, &f.job_type).unwrap().is_none());
    }

    #[test]
    fn result_on_unclaimed_job_is_an_invalid_transition() {
        let f = fixture(2, JobTypeMode::SingleShot);
        let job = f.producer.try_add_job(&f.job_type, json!({}), json!({})).unwrap();

        let err = f
            .consumer
            .process_job_handling_result(&job, &f.job_type, &HandlingResult::success())
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidTransition { expected: JobStatus::Processing, found: JobStatus::Open, .. }
        ));
    }

    #[test]
    fn result_for_another_type_is_rejected() {
        let f = fixture(2, JobTypeMode::SingleShot);
        let other = NewJobType::new("other", JobTypeMode::SingleShot, "x").build().unwrap();
        let job = f.producer.try_add_job(&f.job_type, json!({}), json!({})).unwrap();
        let claimed = f.consumer.get_job_for_handling(job.id, &f.job_type).unwrap().unwrap();

        let err = f
            .consumer
            .process_job_handling_result(&claimed, &other, &HandlingResult::success())
            .unwrap_err();
        assert!(matches!(err, JobError::JobTypeMismatch { .. }));
    }

    #[test]
    fn graceful_reset_undoes_claim() {
        let f = fixture(3, JobTypeMode::SingleShot);
        let job = f.producer.try_add_job(&f.job_type, json!({}), json!({})).unwrap();
        let claimed = f.consumer.get_job_for_handling(job.id, &f.job_type).unwrap().unwrap();

        let reset = f
            .consumer
            .reset_job_to_open_by_graceful_shutdown(&claimed)
            .unwrap()
            .unwrap();
        assert_eq!((reset.status, reset.attempt), (JobStatus::Open, 0));
        assert_eq!(messages(&f.store, job.id).last().unwrap(), MESSAGE_RESET);

        // Second reset is a no-op
        assert!(f.consumer.reset_job_to_open_by_graceful_shutdown(&claimed).unwrap().is_none());
    }

    #[test]
    fn clone_to_restart_creates_fresh_job() {
        let f = fixture(3, JobTypeMode::SelfRestarting);
        let job = f.producer.try_add_job(&f.job_type, json!({"k": "v"}), json!([1])).unwrap();
        let claimed = f.consumer.get_job_for_handling(job.id, &f.job_type).unwrap().unwrap();

        assert!(f.consumer.clone_to_restart_job(&claimed).is_none());

        let done = f
            .consumer
            .process_job_handling_result(&claimed, &f.job_type, &HandlingResult::success())
            .unwrap();
        let copy = f.consumer.clone_to_restart_job(&done).unwrap();

        assert_ne!(copy.id, done.id);
        assert_eq!((copy.status, copy.attempt), (JobStatus::Open, 0));
        assert_eq!(copy.payload, json!({"k": "v"}));
        assert_eq!(copy.parameter, json!([1]));
        assert_eq!(f.consumer.get_job_by_id(done.id).unwrap().unwrap().status, JobStatus::Finished);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Claim,
        Report(ResultCode),
        Reset,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            Just(Step::Claim),
            Just(Step::Report(ResultCode::Success)),
            Just(Step::Report(ResultCode::Failed)),
            Just(Step::Report(ResultCode::Error)),
            Just(Step::Reset),
        ]
    }

    proptest! {
        #[test]
        fn attempts_and_terminal_states_hold(max_retries in 1u32..5, steps in prop::collection::vec(step(), 1..40)) {
            let f = fixture(max_retries, JobTypeMode::SingleShot);
            let job = f.producer.try_add_job(&f.job_type, json!({}), json!({})).unwrap();
            let mut current = job.clone();

            for step in steps {
                let before = f.consumer.get_job_by_id(job.id).unwrap().unwrap();
                match step {
                    Step::Claim => {
                        if let Some(claimed) = f.consumer.get_job_for_handling(job.id, &f.job_type).unwrap() {
                            prop_assert_eq!(before.status, JobStatus::Open);
                            prop_assert_eq!(claimed.attempt, before.attempt + 1);
                            current = claimed;
                        }
                    }
                    Step::Report(code) => {
                        let outcome = f.consumer.process_job_handling_result(
                            &current,
                            &f.job_type,
                            &HandlingResult::new(code),
                        );
                        prop_assert_eq!(outcome.is_ok(), before.status == JobStatus::Processing);
                    }
                    Step::Reset => {
                        if let Some(reset) = f.consumer.reset_job_to_open_by_graceful_shutdown(&current).unwrap() {
                            prop_assert_eq!(before.status, JobStatus::Processing);
                            prop_assert_eq!(reset.attempt, before.attempt - 1);
                        }
                    }
                }

                let after = f.consumer.get_job_by_id(job.id).unwrap().unwrap();
                if before.is_terminal() {
                    prop_assert_eq!(&after, &before);
                }
                prop_assert!(after.attempt <= max_retries);
                if after.status == JobStatus::Open {
                    prop_assert!(after.attempt < max_retries);
                }
            }
        }
    }
}
