//! Worker loop: polls one job type, claims and handles jobs one at a time.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use jobloom_core::JobTypeId;
use jobloom_jobs::{HandlerRegistry, HandlingResult, Job, JobHandler, JobType};

use crate::config::WorkerConfig;

use super::consumer::JobConsumer;
use super::error::JobError;
use super::job_types::JobTypeRegistry;
use super::signals::{WorkerControl, WorkerEvent, WorkerSignal};
use super::store::JobStore;

/// Why a session ended without error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SessionEnd {
    Terminated,
    Reload,
}

enum HandlerOutcome {
    Finished(HandlingResult),
    Interrupted(SessionEnd),
}

/// A single-threaded worker bound to one job type per [`Worker::run`].
pub struct Worker<S> {
    job_types: JobTypeRegistry<S>,
    consumer: JobConsumer<S>,
    handlers: Arc<HandlerRegistry>,
    config: WorkerConfig,
    control: WorkerControl,
    events: mpsc::Receiver<WorkerEvent>,
    next_ticket: Cell<u64>,
}

impl<S: JobStore + 'static> Worker<S> {
    pub fn new(store: Arc<S>, handlers: Arc<HandlerRegistry>, config: WorkerConfig) -> Self {
        let (tx, events) = mpsc::channel();
        Self {
            job_types: JobTypeRegistry::new(store.clone()),
            consumer: JobConsumer::new(store),
            handlers,
            config,
            control: WorkerControl::new(tx),
            events,
            next_ticket: Cell::new(0),
        }
    }

    /// Handle for sending signals to this worker from other threads.
    pub fn control(&self) -> WorkerControl {
        self.control.clone()
    }

    /// Forward SIGTERM/SIGINT/SIGHUP/SIGUSR1 to this worker while the returned
    /// listener is alive.
    #[cfg(unix)]
    pub fn listen_for_signals(&self) -> std::io::Result<super::signals::SignalListener> {
        super::signals::listen(self.control())
    }

    /// Process jobs of `job_type_id` until terminated.
    ///
    /// A reload restarts the session, re-reading the job type and handler.
    /// Infrastructure failures end the loop after the in-flight job has been
    /// reset.
    pub fn run(&self, job_type_id: JobTypeId, limit: usize) -> Result<(), JobError> {
        info!(worker = %self.config.name, job_type_id = %job_type_id, limit, "worker started");

        loop {
            match self.session(job_type_id, limit) {
                Ok(SessionEnd::Terminated) => {
                    info!(worker = %self.config.name, "worker stopped");
                    return Ok(());
                }
                Ok(SessionEnd::Reload) => {
                    info!(worker = %self.config.name, "worker reloading");
                }
                Err(e) => {
                    error!(worker = %self.config.name, error = %e, "worker failed");
                    return Err(e);
                }
            }
        }
    }

    fn session(&self, job_type_id: JobTypeId, limit: usize) -> Result<SessionEnd, JobError> {
        let job_type = self
            .job_types
            .get_job_type_by_id(job_type_id)?
            .ok_or_else(|| JobError::unknown_job_type(job_type_id.to_string()))?;
        let handler = self.handlers.resolve(&job_type)?;

        loop {
            if let Some(end) = self.pending_signal() {
                return Ok(end);
            }

            let candidates = self.consumer.get_jobs_for_processing_by_type(&job_type, limit)?;
            info!(
                worker = %self.config.name,
                job_type = %job_type.name,
                found = candidates.len(),
                "polled for jobs"
            );

            let mut claimed = 0usize;
            for candidate in candidates {
                if let Some(end) = self.pending_signal() {
                    return Ok(end);
                }

                let Some(job) = self.consumer.get_job_for_handling(candidate.job_id, &job_type)? else {
                    continue;
                };
                claimed += 1;

                match self.handle_claimed(&job, &job_type, &handler) {
                    Ok(None) => {}
                    Ok(Some(end)) => return Ok(end),
                    Err(e) => {
                        self.graceful_shutdown(&job);
                        return Err(e);
                    }
                }
            }

            // Candidates that were all lost to other workers or out of
            // attempts count as an empty poll.
            if claimed == 0 {
                debug!(worker = %self.config.name, backoff = ?self.config.idle_backoff, "no claimable jobs, sleeping");
                if let Some(end) = self.idle(self.config.idle_backoff) {
                    return Ok(end);
                }
            }
        }
    }

    fn handle_claimed(
        &self,
        job: &Job,
        job_type: &JobType,
        handler: &Arc<dyn JobHandler>,
    ) -> Result<Option<SessionEnd>, JobError> {
        info!(worker = %self.config.name, job_id = %job.id, attempt = job.attempt, "handling job");

        let result = match self.dispatch(job, handler)? {
            HandlerOutcome::Finished(result) => result,
            HandlerOutcome::Interrupted(end) => {
                info!(worker = %self.config.name, job_id = %job.id, "signal received with job in flight");
                self.graceful_shutdown(job);
                return Ok(Some(end));
            }
        };

        let processed = self
            .consumer
            .process_job_handling_result(job, job_type, &result)?;
        info!(
            worker = %self.config.name,
            job_id = %processed.id,
            status = %processed.status,
            attempt = processed.attempt,
            "job handled"
        );

        if job_type.is_self_restarting() && processed.is_terminal() {
            self.consumer.clone_to_restart_job(&processed);
        }
        Ok(None)
    }

    /// Run the handler on a helper thread and wait for it or a signal.
    fn dispatch(&self, job: &Job, handler: &Arc<dyn JobHandler>) -> Result<HandlerOutcome, JobError> {
        let ticket = self.next_ticket.get();
        self.next_ticket.set(ticket + 1);

        let tx = self.control.sender();
        let handler = handler.clone();
        let owned = job.clone();
        thread::Builder::new()
            .name(format!("{}-handler", self.config.name))
            .spawn(move || {
                let result = match panic::catch_unwind(AssertUnwindSafe(|| handler.handle_job(&owned))) {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => {
                        warn!(job_id = %owned.id, error = %e, "handler returned an error");
                        HandlingResult::from_handler_error(&e)
                    }
                    Err(payload) => {
                        warn!(job_id = %owned.id, "handler panicked");
                        HandlingResult::from_panic(payload.as_ref())
                    }
                };
                let _ = tx.send(WorkerEvent::HandlerFinished {
                    ticket,
                    job_id: owned.id,
                    result,
                });
            })
            .map_err(JobError::HandlerThread)?;

        loop {
            let event = match self.events.recv() {
                Ok(event) => event,
                // Unreachable while `self.control` holds a sender.
                Err(_) => return Ok(HandlerOutcome::Interrupted(SessionEnd::Terminated)),
            };

            match event {
                WorkerEvent::HandlerFinished {
                    ticket: done, result, ..
                } if done == ticket => return Ok(HandlerOutcome::Finished(result)),
                WorkerEvent::HandlerFinished { job_id, .. } => {
                    debug!(job_id = %job_id, "discarding result of abandoned handler");
                }
                WorkerEvent::Signal(signal) => {
                    if let Some(end) = self.on_signal(signal) {
                        return Ok(HandlerOutcome::Interrupted(end));
                    }
                }
            }
        }
    }

    /// Drain queued events without blocking.
    fn pending_signal(&self) -> Option<SessionEnd> {
        while let Ok(event) = self.events.try_recv() {
            if let Some(end) = self.on_idle_event(event) {
                return Some(end);
            }
        }
        None
    }

    /// Sleep for `backoff`, waking early for a terminate or reload.
    fn idle(&self, backoff: Duration) -> Option<SessionEnd> {
        let deadline = Instant::now() + backoff;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match self.events.recv_timeout(remaining) {
                Ok(event) => {
                    if let Some(end) = self.on_idle_event(event) {
                        return Some(end);
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => return None,
                Err(mpsc::RecvTimeoutError::Disconnected) => return Some(SessionEnd::Terminated),
            }
        }
    }

    fn on_idle_event(&self, event: WorkerEvent) -> Option<SessionEnd> {
        match event {
            WorkerEvent::Signal(signal) => self.on_signal(signal),
            WorkerEvent::HandlerFinished { job_id, .. } => {
                debug!(job_id = %job_id, "discarding result of abandoned handler");
                None
            }
        }
    }

    fn on_signal(&self, signal: WorkerSignal) -> Option<SessionEnd> {
        match signal {
            WorkerSignal::Terminate => {
                info!(worker = %self.config.name, "terminate requested");
                Some(SessionEnd::Terminated)
            }
            WorkerSignal::Reload => {
                info!(worker = %self.config.name, "reload requested");
                Some(SessionEnd::Reload)
            }
            WorkerSignal::User => {
                info!(worker = %self.config.name, "worker alive");
                None
            }
        }
    }

    /// Put the in-flight job back so another worker can pick it up.
    fn graceful_shutdown(&self, job: &Job) {
        info!(worker = %self.config.name, job_id = %job.id, "graceful shutdown started");
        match self.consumer.reset_job_to_open_by_graceful_shutdown(job) {
            Ok(_) => info!(worker = %self.config.name, job_id = %job.id, "graceful shutdown complete"),
            Err(e) => error!(
                worker = %self.config.name,
                job_id = %job.id,
                error = %e,
                "failed to reset in-flight job"
            ),
        }
    }
}
