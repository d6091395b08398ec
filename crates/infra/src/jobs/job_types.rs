//! Job type registry service.

use std::sync::Arc;

use tracing::{info, warn};

use jobloom_core::JobTypeId;
use jobloom_jobs::{JobType, NewJobType};

use super::error::JobError;
use super::store::JobTypeRepository;

pub struct JobTypeRegistry<S> {
    store: Arc<S>,
}

impl<S> Clone for JobTypeRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: JobTypeRepository> JobTypeRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Validate and persist a job type.
    pub fn try_add_job_type(&self, new: NewJobType) -> Result<JobType, JobError> {
        let job_type = new.build()?;
        self.store.insert_job_type(&job_type)?;
        info!(job_type_id = %job_type.id, name = %job_type.name, "job type registered");
        Ok(job_type)
    }

    /// Like [`Self::try_add_job_type`], but logs the failure and returns `None`.
    pub fn add_job_type(&self, new: NewJobType) -> Option<JobType> {
        let name = new.name.clone();
        match self.try_add_job_type(new) {
            Ok(job_type) => Some(job_type),
            Err(e) => {
                warn!(name = %name, error = %e, "failed to add job type");
                None
            }
        }
    }

    pub fn get_job_type_by_id(&self, id: JobTypeId) -> Result<Option<JobType>, JobError> {
        Ok(self.store.find_job_type(id)?)
    }

    pub fn get_job_type_by_name(&self, name: &str) -> Result<Option<JobType>, JobError> {
        Ok(self.store.find_job_type_by_name(name)?)
    }

    /// Look a job type up by id, falling back to its name.
    pub fn resolve(&self, reference: &str) -> Result<JobType, JobError> {
        let by_id = match reference.parse::<JobTypeId>() {
            Ok(id) => self.get_job_type_by_id(id)?,
            Err(_) => None,
        };
        match by_id {
            Some(job_type) => Ok(job_type),
            None => self
                .get_job_type_by_name(reference)?
                .ok_or_else(|| JobError::unknown_job_type(reference)),
        }
    }

    pub fn list_job_types(&self) -> Result<Vec<JobType>, JobError> {
        Ok(self.store.list_job_types()?)
    }
}
