//! Handlers shipped with the binary, keyed by job type locator.

use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, anyhow, bail};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tracing::info;

use jobloom_jobs::{HandlerRegistry, HandlingResult, Job, JobHandler};

pub const NOOP: &str = "builtin.noop";
pub const LOG: &str = "builtin.log";
pub const COMMAND: &str = "builtin.command";

pub fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register(NOOP, |_job: &Job| -> anyhow::Result<HandlingResult> {
            Ok(HandlingResult::success())
        })
        .register(LOG, |job: &Job| -> anyhow::Result<HandlingResult> {
            info!(job_id = %job.id, attempt = job.attempt, payload = %job.payload, "job payload");
            Ok(HandlingResult::success())
        })
        .register_factory(COMMAND, |job_type| {
            let handler = CommandHandler::from_configuration(&job_type.configuration)?;
            Ok(Arc::new(handler) as Arc<dyn JobHandler>)
        });
    registry
}

/// Runs an external program with the job payload as JSON on stdin.
///
/// Exit status 0 is success, any other status a retryable failure. A program
/// that cannot be started is an error.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandHandler {
    program: String,
    #[serde(default)]
    args: Vec<String>,
}

impl CommandHandler {
    pub fn from_configuration(configuration: &JsonValue) -> anyhow::Result<Self> {
        let handler: Self = serde_json::from_value(configuration.clone())
            .context(r#"expected configuration {"program": "...", "args": ["..."]}"#)?;
        if handler.program.trim().is_empty() {
            bail!("`program` must not be empty");
        }
        Ok(handler)
    }
}

impl JobHandler for CommandHandler {
    fn handle_job(&self, job: &Job) -> anyhow::Result<HandlingResult> {
        let body = serde_json::to_vec(&job.payload)?;
        let spawned = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                return Ok(HandlingResult::error(format!("failed to start `{}`: {e}", self.program)));
            }
        };

        let stdin = child.stdin.take();

        // Feed stdin while the output pipes are drained, or a program that
        // echoes its input deadlocks once a pipe buffer fills.
        let (output, written) = thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => match stdin.write_all(&body) {
                    // The program does not read its input
                    Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
                    other => other,
                },
                None => Ok(()),
            });
            let output = child.wait_with_output();
            (output, writer.join())
        });

        let output = output.context("waiting for command")?;
        written
            .map_err(|_| anyhow!("payload writer thread panicked"))?
            .context("writing payload to command")?;

        let data = json!({
            "exit_code": output.status.code(),
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        });

        if output.status.success() {
            Ok(HandlingResult::success().with_additional_data(data))
        } else {
            Ok(HandlingResult::failed(format!("`{}` exited with {}", self.program, output.status))
                .with_additional_data(data))
        }
    }
}
