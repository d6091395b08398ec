use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value as JsonValue;

use jobloom_core::JobId;
use jobloom_infra::{ConfigError, WorkerConfig};
use jobloom_jobs::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_SECS, JobTypeMode};

#[derive(Parser, Debug)]
#[command(
    name = "jobloom",
    version,
    about = "Durable job queue: run workers and manage job types and jobs",
    long_about = "Runs single-threaded workers bound to one job type and provides \
                  admin commands for job types, jobs and their history"
)]
pub struct Cli {
    /// PostgreSQL connection string; without it an in-memory store is used
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Seconds a worker sleeps when a poll finds no jobs
    #[arg(long, global = true, env = "JOBLOOM_IDLE_BACKOFF_SECS")]
    pub idle_backoff: Option<u64>,

    /// Maximum number of PostgreSQL connections
    #[arg(long, global = true, default_value_t = 5)]
    pub max_connections: u32,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Environment configuration with command line overrides applied.
    pub fn worker_config(&self) -> Result<WorkerConfig, ConfigError> {
        let mut config = WorkerConfig::from_env()?;
        if let Some(url) = self.database_url.as_deref().filter(|u| !u.trim().is_empty()) {
            config = config.with_database_url(url);
        }
        if let Some(secs) = self.idle_backoff {
            config = config.with_idle_backoff(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Start a worker bound to one job type; blocks until terminated
    Run {
        /// Job type id or name
        job_type: String,

        /// Maximum number of candidate jobs fetched per poll
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        limit: u64,
    },
    /// Print open jobs of a type without claiming them
    List {
        /// Job type id or name
        job_type: String,

        /// Maximum number of jobs to print
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        limit: u64,
    },
    /// List registered job types
    Types,
    /// Register a job type
    AddType {
        /// Unique name (at most 255 characters)
        name: String,

        /// Handler locator, e.g. builtin.command
        locator: String,

        #[arg(long, value_enum, default_value_t = ModeArg::SingleShot)]
        mode: ModeArg,

        /// Maximum number of claims per job
        #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
        max_retries: u32,

        /// Delay between attempts in seconds (informational)
        #[arg(long, default_value_t = DEFAULT_RETRY_DELAY_SECS)]
        retry_delay: u32,

        #[arg(long)]
        description: Option<String>,

        /// Handler configuration as a JSON object or array
        #[arg(long, default_value = "{}", value_parser = parse_json)]
        configuration: JsonValue,
    },
    /// Enqueue a job
    Add {
        /// Job type id or name
        job_type: String,

        /// Handler input as a JSON object or array
        #[arg(long, default_value = "{}", value_parser = parse_json)]
        payload: JsonValue,

        /// Execution hints as a JSON object or array
        #[arg(long, default_value = "{}", value_parser = parse_json)]
        parameter: JsonValue,
    },
    /// Show the history of a job
    History {
        job_id: JobId,
    },
    /// Create the PostgreSQL schema if missing
    Migrate,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    /// Each job runs once through the state machine
    SingleShot,
    /// A fresh copy is queued after each handled job
    SelfRestarting,
}

impl From<ModeArg> for JobTypeMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::SingleShot => JobTypeMode::SingleShot,
            ModeArg::SelfRestarting => JobTypeMode::SelfRestarting,
        }
    }
}

fn parse_json(raw: &str) -> Result<JsonValue, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))
}
