//! Command execution against any job store.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::info;

use jobloom_infra::WorkerConfig;
use jobloom_infra::jobs::{
    JobConsumer, JobHistory, JobProducer, JobStore, JobTypeRegistry, Worker,
};
use jobloom_jobs::NewJobType;

use crate::cli::Command;
use crate::{handlers, output};

pub fn execute<S, W>(store: Arc<S>, command: Command, config: WorkerConfig, out: &mut W) -> Result<()>
where
    S: JobStore + 'static,
    W: Write,
{
    let job_types = JobTypeRegistry::new(store.clone());

    match command {
        Command::Run { job_type, limit } => {
            let job_type = job_types.resolve(&job_type)?;
            let worker = Worker::new(store, Arc::new(handlers::registry()), config);

            #[cfg(unix)]
            let _signals = worker
                .listen_for_signals()
                .context("failed to install signal handlers")?;

            worker
                .run(job_type.id, to_usize(limit))
                .with_context(|| format!("worker for job type `{}` failed", job_type.name))?;
        }
        Command::List { job_type, limit } => {
            let job_type = job_types.resolve(&job_type)?;
            let consumer = JobConsumer::new(store);
            let mut jobs = Vec::new();
            for candidate in consumer.get_jobs_for_processing_by_type(&job_type, to_usize(limit))? {
                if let Some(job) = consumer.get_job_by_id(candidate.job_id)? {
                    jobs.push(job);
                }
            }
            write!(out, "{}", output::jobs(&job_type, &jobs))?;
        }
        Command::Types => {
            write!(out, "{}", output::job_types(&job_types.list_job_types()?))?;
        }
        Command::AddType {
            name,
            locator,
            mode,
            max_retries,
            retry_delay,
            description,
            configuration,
        } => {
            let mut new = NewJobType::new(name, mode.into(), locator)
                .max_retries(max_retries)
                .retry_delay_secs(retry_delay)
                .configuration(configuration);
            if let Some(description) = description {
                new = new.description(description);
            }
            let job_type = job_types
                .try_add_job_type(new)
                .context("failed to add job type")?;
            writeln!(out, "{}", job_type.id)?;
        }
        Command::Add {
            job_type,
            payload,
            parameter,
        } => {
            let job_type = job_types.resolve(&job_type)?;
            let job = JobProducer::new(store)
                .try_add_job(&job_type, payload, parameter)
                .context("failed to add job")?;
            info!(job_id = %job.id, job_type = %job_type.name, "job added");
            writeln!(out, "{}", job.id)?;
        }
        Command::History { job_id } => {
            let entries = JobHistory::new(store).entries_for(job_id)?;
            write!(out, "{}", output::history(&entries))?;
        }
        Command::Migrate => bail!("`migrate` needs a PostgreSQL store; pass --database-url"),
    }
    Ok(())
}

fn to_usize(limit: u64) -> usize {
    usize::try_from(limit).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::ModeArg;
    use jobloom_core::JobId;
    use jobloom_infra::jobs::InMemoryJobStore;
    use serde_json::json;

    fn exec(store: &Arc<InMemoryJobStore>, command: Command) -> Result<String> {
        let mut out = Vec::new();
        execute(store.clone(), command, WorkerConfig::default(), &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    fn add_type(store: &Arc<InMemoryJobStore>, name: &str) -> String {
        exec(
            store,
            Command::AddType {
                name: name.to_string(),
                locator: handlers::NOOP.to_string(),
                mode: ModeArg::SingleShot,
                max_retries: 2,
                retry_delay: 10,
                description: Some("test type".to_string()),
                configuration: json!({}),
            },
        )
        .unwrap()
        .trim()
        .to_string()
    }

    #[test]
    fn add_then_list_by_name_and_id() {
        let store = InMemoryJobStore::arc();
        let type_id = add_type(&store, "mailer");

        let job_id = exec(
            &store,
            Command::Add {
                job_type: "mailer".to_string(),
                payload: json!({"to": "ops"}),
                parameter: json!({}),
            },
        )
        .unwrap();
        let job_id: JobId = job_id.trim().parse().unwrap();

        for reference in ["mailer".to_string(), type_id] {
            let listed = exec(&store, Command::List { job_type: reference, limit: 10 }).unwrap();
            assert!(listed.contains(&job_id.to_string()));
            assert!(listed.contains(r#"{"to":"ops"}"#));
        }

        let history = exec(&store, Command::History { job_id }).unwrap();
        assert!(history.contains("The job has been created"));
    }

    #[test]
    fn types_lists_registered_types() {
        let store = InMemoryJobStore::arc();
        add_type(&store, "alpha");
        let text = exec(&store, Command::Types).unwrap();
        assert!(text.contains("alpha"));
        assert!(text.contains(handlers::NOOP));
    }

    #[test]
    fn invalid_input_is_reported() {
        let store = InMemoryJobStore::arc();
        add_type(&store, "mailer");

        let err = exec(
            &store,
            Command::Add {
                job_type: "mailer".to_string(),
                payload: json!("flat"),
                parameter: json!({}),
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("failed to add job"));

        assert!(exec(&store, Command::Types).is_ok());
        assert!(exec(&store, Command::List { job_type: "missing".to_string(), limit: 1 }).is_err());
        assert!(exec(&store, Command::Migrate).is_err());
    }

    #[test]
    fn run_with_unknown_type_fails_fast() {
        let store = InMemoryJobStore::arc();
        let err = exec(&store, Command::Run { job_type: "ghost".to_string(), limit: 1 }).unwrap_err();
        assert!(err.to_string().contains("unknown job type"));
    }
}
