//! Job types: how a class of jobs is executed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use jobloom_core::{DomainError, DomainResult, Entity, JobTypeId};

use crate::types::is_structured;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_DELAY_SECS: u32 = 10;

const MAX_NAME_LEN: usize = 255;
const MAX_LOCATOR_LEN: usize = 16_000;

/// Execution mode of a job type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTypeMode {
    /// Each job runs through the state machine once.
    SingleShot,
    /// After each handled job a fresh copy is queued, so the type recurs forever.
    SelfRestarting,
}

impl JobTypeMode {
    pub const fn code(self) -> i16 {
        match self {
            JobTypeMode::SingleShot => 100,
            JobTypeMode::SelfRestarting => 101,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            100 => Some(JobTypeMode::SingleShot),
            101 => Some(JobTypeMode::SelfRestarting),
            _ => None,
        }
    }
}

/// A class of jobs sharing a handler, mode and retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobType {
    pub id: JobTypeId,
    pub name: String,
    pub description: Option<String>,
    pub mode: JobTypeMode,
    /// Key of the handler in the handler registry
    pub locator: String,
    /// Handler-specific settings
    pub configuration: JsonValue,
    /// Maximum number of claims a job of this type may receive
    pub max_retries: u32,
    /// Informational delay between attempts, in seconds
    pub retry_delay_secs: u32,
    pub created_at: DateTime<Utc>,
}

impl JobType {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.retry_delay_secs))
    }

    pub fn is_self_restarting(&self) -> bool {
        self.mode == JobTypeMode::SelfRestarting
    }
}

impl Entity for JobType {
    type Id = JobTypeId;

    fn id(&self) -> JobTypeId {
        self.id
    }
}

/// Input for registering a job type.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJobType {
    pub name: String,
    pub mode: JobTypeMode,
    pub locator: String,
    pub max_retries: u32,
    pub retry_delay_secs: u32,
    pub description: Option<String>,
    pub configuration: JsonValue,
}

impl NewJobType {
    pub fn new(name: impl Into<String>, mode: JobTypeMode, locator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode,
            locator: locator.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            description: None,
            configuration: JsonValue::Object(Default::default()),
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_delay_secs(mut self, secs: u32) -> Self {
        self.retry_delay_secs = secs;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn configuration(mut self, configuration: JsonValue) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("job type name is required"));
        }
        if self.name.chars().count() > MAX_NAME_LEN {
            return Err(DomainError::validation(format!(
                "job type name exceeds {MAX_NAME_LEN} characters"
            )));
        }
        if self.locator.trim().is_empty() {
            return Err(DomainError::validation("job type locator is required"));
        }
        if self.locator.chars().count() > MAX_LOCATOR_LEN {
            return Err(DomainError::validation(format!(
                "job type locator exceeds {MAX_LOCATOR_LEN} characters"
            )));
        }
        if !is_structured(&self.configuration) {
            return Err(DomainError::validation(
                "job type configuration must be a JSON object or array",
            ));
        }
        Ok(())
    }

    /// Validate and assign identity.
    pub fn build(self) -> DomainResult<JobType> {
        self.validate()?;
        Ok(JobType {
            id: JobTypeId::new(),
            name: self.name,
            description: self.description,
            mode: self.mode,
            locator: self.locator,
            configuration: self.configuration,
            max_retries: self.max_retries,
            retry_delay_secs: self.retry_delay_secs,
            created_at: Utc::now(),
        })
    }
}
