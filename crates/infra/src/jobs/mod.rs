//! Durable job queue: storage, the job state machine and the worker loop.
//!
//! ## Components
//!
//! - `JobStore`: persistence for jobs, job types and history (in-memory or Postgres)
//! - `JobTypeRegistry`: registers and looks up job types
//! - `JobProducer`: enqueues new jobs
//! - `JobConsumer`: claims jobs and applies handler results
//! - `JobHistory`: append-only audit trail
//! - `Worker`: polls one job type and runs its handler, reacting to signals

pub mod consumer;
pub mod error;
pub mod history;
pub mod job_types;
pub mod postgres;
pub mod producer;
pub mod signals;
pub mod store;
pub mod worker;

pub use consumer::JobConsumer;
pub use error::JobError;
pub use history::JobHistory;
pub use job_types::JobTypeRegistry;
pub use postgres::PostgresJobStore;
pub use producer::JobProducer;
#[cfg(unix)]
pub use signals::SignalListener;
pub use signals::{WorkerControl, WorkerSignal};
pub use store::{
    InMemoryJobStore, JobHistoryRepository, JobRepository, JobStore, JobStoreError,
    JobTypeRepository,
};
pub use worker::Worker;
