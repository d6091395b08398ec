//! `jobloom-jobs`
//!
//! **Responsibility:** the storage-agnostic job model.
//!
//! - Job types, jobs, statuses and history entries
//! - The handler contract (`JobHandler` → `HandlingResult`)
//! - The handler registry used to resolve a job type's locator
//!
//! Nothing here performs I/O; stores and the worker loop live in `jobloom-infra`.

pub mod handler;
pub mod job_type;
pub mod registry;
pub mod types;

pub use handler::{HandlingResult, JobHandler, ResultCode, UnknownResultCode, panic_message};
pub use job_type::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_SECS, JobType, JobTypeMode, NewJobType};
pub use registry::{HandlerFactory, HandlerRegistry, RegistryError};
pub use types::{
    ActiveState, AttemptChange, Job, JobForProcessing, JobHistoryEntry, JobStatus, StatusChange,
    UnknownStatusCode,
};
