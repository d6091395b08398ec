//! Infrastructure layer: job storage, services, worker loop and config.

pub mod config;
pub mod jobs;

pub use config::{ConfigError, WorkerConfig};
