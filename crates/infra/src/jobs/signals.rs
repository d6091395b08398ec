//! Control signals for a running worker.
//!
//! OS signals and handler completions arrive on the same channel, so the
//! worker can react to either while it waits.

use std::sync::mpsc;

use jobloom_core::JobId;
use jobloom_jobs::HandlingResult;

/// External instruction to a running worker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WorkerSignal {
    /// Reset the in-flight job and stop.
    Terminate,
    /// Reset the in-flight job and start a fresh session for the same type.
    Reload,
    /// Liveness probe; logged only.
    User,
}

#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Signal(WorkerSignal),
    HandlerFinished {
        ticket: u64,
        job_id: JobId,
        result: HandlingResult,
    },
}

/// Cloneable handle for sending signals to a worker.
#[derive(Debug, Clone)]
pub struct WorkerControl {
    tx: mpsc::Sender<WorkerEvent>,
}

impl WorkerControl {
    pub(crate) fn new(tx: mpsc::Sender<WorkerEvent>) -> Self {
        Self { tx }
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<WorkerEvent> {
        self.tx.clone()
    }

    /// Returns `false` once the worker is gone.
    pub fn send(&self, signal: WorkerSignal) -> bool {
        self.tx.send(WorkerEvent::Signal(signal)).is_ok()
    }

    pub fn terminate(&self) -> bool {
        self.send(WorkerSignal::Terminate)
    }

    pub fn reload(&self) -> bool {
        self.send(WorkerSignal::Reload)
    }

    pub fn user(&self) -> bool {
        self.send(WorkerSignal::User)
    }
}

#[cfg(unix)]
pub use os::{SignalListener, listen};

#[cfg(unix)]
mod os {
    use std::io;
    use std::thread;

    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM, SIGUSR1};
    use signal_hook::iterator::{Handle, Signals};
    use tracing::{debug, info};

    use super::{WorkerControl, WorkerSignal};

    /// Forwards process signals to a worker until dropped.
    ///
    /// SIGTERM and SIGINT terminate, SIGHUP reloads, SIGUSR1 is a liveness probe.
    #[derive(Debug)]
    pub struct SignalListener {
        handle: Handle,
        join: Option<thread::JoinHandle<()>>,
    }

    pub fn listen(control: WorkerControl) -> io::Result<SignalListener> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGHUP, SIGUSR1])?;
        let handle = signals.handle();

        let join = thread::Builder::new()
            .name("jobloom-signals".to_string())
            .spawn(move || {
                for raw in signals.forever() {
                    let signal = match raw {
                        SIGTERM | SIGINT => WorkerSignal::Terminate,
                        SIGHUP => WorkerSignal::Reload,
                        SIGUSR1 => WorkerSignal::User,
                        _ => continue,
                    };
                    info!(signal = raw, action = ?signal, "signal received");
                    if !control.send(signal) {
                        break;
                    }
                }
                debug!("signal listener stopped");
            })?;

        Ok(SignalListener {
            handle,
            join: Some(join),
        })
    }

    impl Drop for SignalListener {
        fn drop(&mut self) {
            self.handle.close();
            if let Some(join) = self.join.take() {
                let _ = join.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_reports_disconnected_worker() {
        let (tx, rx) = mpsc::channel();
        let control = WorkerControl::new(tx);

        assert!(control.reload());
        assert!(matches!(
            rx.recv().unwrap(),
            WorkerEvent::Signal(WorkerSignal::Reload)
        ));

        drop(rx);
        assert!(!control.terminate());
    }

    #[cfg(unix)]
    #[test]
    fn os_signal_is_forwarded() {
        let (tx, rx) = mpsc::channel();
        let listener = listen(WorkerControl::new(tx)).unwrap();

        signal_hook::low_level::raise(signal_hook::consts::signal::SIGUSR1).unwrap();
        let event = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert!(matches!(event, WorkerEvent::Signal(WorkerSignal::User)));

        drop(listener);
    }
}
