//! Per-service lifecycle state machine.
//!
//! Each job runs as its own task owning all of its state. `Start`, `Stop`,
//! status queries and exit notifications all arrive through one mailbox and
//! are handled strictly one at a time, so an exit racing an explicit stop is
//! ordered by the mailbox rather than by flag timing.
//!
//! A separate watcher task per spawned process owns the `Child`, waits for
//! it to exit, delivers stop signals to it and posts an `Exited` message
//! back to the job.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use serde::Serialize;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::bus::OutputBus;
use crate::config::ServiceDefinition;
use crate::error::{JobErrorKind, ShellError, StopCause, StopCauses};
use crate::executor::{signal_child, with_timeout, SubprocessBuilder};

const MAILBOX_SIZE: usize = 32;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Never spawned, or the last spawn attempt failed.
    Idle,
    /// A process is owned and its death has not been confirmed.
    Running,
    /// The last process exited or was stopped and is confirmed dead.
    Stopped,
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub state: JobState,
    pub start_count: u64,
    pub auto_restart_armed: bool,
    pub enabled: bool,
    pub pid: Option<u32>,
    pub last_exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
}

/// How a watched process ended.
#[derive(Debug, Clone)]
struct ExitRecord {
    code: Option<i32>,
    signal: Option<i32>,
    /// Set when waiting on the process failed instead of reporting a status.
    error: Option<String>,
}

enum JobCommand {
    Start {
        reply: oneshot::Sender<Result<(), JobErrorKind>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), JobErrorKind>>,
    },
    Status {
        reply: oneshot::Sender<JobStatus>,
    },
    Exited {
        generation: u64,
        record: ExitRecord,
    },
}

struct SignalRequest {
    signal: Signal,
    reply: oneshot::Sender<io::Result<()>>,
}

/// Handle to a process the job still owns.
struct RunningProcess {
    generation: u64,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    signal_tx: mpsc::Sender<SignalRequest>,
    exited: watch::Receiver<Option<ExitRecord>>,
}

impl RunningProcess {
    async fn signal(&self, signal: Signal) -> io::Result<()> {
        let (reply, rx) = oneshot::channel();
        if self
            .signal_tx
            .send(SignalRequest { signal, reply })
            .await
            .is_err()
        {
            // Watcher already saw the exit.
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    async fn wait_exited(&mut self) -> Option<ExitRecord> {
        self.exited
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|record| (*record).clone())
    }
}

/// Cloneable handle to one service's lifecycle.
///
/// The job lives as long as at least one handle does. Dropping the last
/// handle ends the job, and any process it still owns is killed.
#[derive(Clone)]
pub struct ProcessJob {
    name: Arc<str>,
    definition: Arc<ServiceDefinition>,
    tx: mpsc::Sender<JobCommand>,
}

impl ProcessJob {
    /// Create a job for `name` whose start count begins at `start_count`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        name: &str,
        definition: ServiceDefinition,
        start_count: u64,
        stop_timeout: Duration,
        bus: OutputBus,
    ) -> Self {
        let name: Arc<str> = Arc::from(name);
        let definition = Arc::new(definition);
        let (tx, rx) = mpsc::channel(MAILBOX_SIZE);

        let actor = JobActor {
            name: Arc::clone(&name),
            definition: Arc::clone(&definition),
            state: JobState::Idle,
            start_count,
            auto_restart_armed: false,
            running: None,
            last_exit_code: None,
            stop_timeout,
            bus,
            mailbox: tx.downgrade(),
        };
        tokio::spawn(actor.run(rx));

        Self {
            name,
            definition,
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &ServiceDefinition {
        &self.definition
    }

    /// Spawn the service's process.
    pub async fn start(&self) -> Result<(), ShellError> {
        self.request(|reply| JobCommand::Start { reply })
            .await?
            .map_err(|kind| ShellError::job(self.name(), kind))
    }

    /// Signal the process and wait, bounded by the stop timeout, for it to die.
    pub async fn stop(&self) -> Result<(), ShellError> {
        self.request(|reply| JobCommand::Stop { reply })
            .await?
            .map_err(|kind| ShellError::job(self.name(), kind))
    }

    pub async fn status(&self) -> Result<JobStatus, ShellError> {
        self.request(|reply| JobCommand::Status { reply }).await
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> JobCommand,
    ) -> Result<R, ShellError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ShellError::job(self.name(), JobErrorKind::Unavailable))?;
        rx.await
            .map_err(|_| ShellError::job(self.name(), JobErrorKind::Unavailable))
    }
}

impl std::fmt::Debug for ProcessJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessJob")
            .field("name", &self.name)
            .field("executable", &self.definition.executable)
            .finish()
    }
}

struct JobActor {
    name: Arc<str>,
    definition: Arc<ServiceDefinition>,
    state: JobState,
    start_count: u64,
    auto_restart_armed: bool,
    running: Option<RunningProcess>,
    last_exit_code: Option<i32>,
    stop_timeout: Duration,
    bus: OutputBus,
    /// Weak so that the job ends once every handle is gone.
    mailbox: mpsc::WeakSender<JobCommand>,
}

impl JobActor {
    async fn run(mut self, mut rx: mpsc::Receiver<JobCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                JobCommand::Start { reply } => {
                    let _ = reply.send(self.start());
                }
                JobCommand::Stop { reply } => {
                    let result = self.stop().await;
                    let _ = reply.send(result);
                }
                JobCommand::Status { reply } => {
                    let _ = reply.send(self.status());
                }
                JobCommand::Exited { generation, record } => {
                    self.on_exit(generation, record);
                }
            }
        }
        debug!(service = %self.name, "Job released");
    }

    fn start(&mut self) -> Result<(), JobErrorKind> {
        if self.definition.executable.is_empty() {
            return Err(JobErrorKind::NoExecutable);
        }
        if self.running.is_some() {
            return Err(JobErrorKind::AlreadyRunning);
        }
        if !self.definition.is_enabled() {
            debug!(service = %self.name, "Service disabled, not starting");
            return Ok(());
        }

        self.auto_restart_armed = self.definition.auto_restart();

        let mut child = match SubprocessBuilder::for_service(&self.name, &self.definition).spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.auto_restart_armed = false;
                self.state = JobState::Idle;
                warn!(
                    service = %self.name,
                    executable = %self.definition.executable,
                    error = %e,
                    "Process failed to start"
                );
                return Err(JobErrorKind::Spawn {
                    message: e.to_string(),
                });
            }
        };

        self.start_count += 1;
        let generation = self.start_count;
        let pid = child.id();

        let topic = OutputBus::output_topic(&self.name);
        if let Some(stdout) = child.stdout.take() {
            self.bus.forward(topic.clone(), stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            self.bus.forward(topic, stderr);
        }

        let (signal_tx, signal_rx) = mpsc::channel(4);
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(watch_process(
            Arc::clone(&self.name),
            child,
            generation,
            self.mailbox.clone(),
            signal_rx,
            exit_tx,
        ));

        self.running = Some(RunningProcess {
            generation,
            pid,
            started_at: Utc::now(),
            signal_tx,
            exited: exit_rx,
        });
        self.state = JobState::Running;

        info!(
            service = %self.name,
            pid = ?pid,
            start_count = self.start_count,
            "Service started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), JobErrorKind> {
        // Disarm before signalling so the exit we are about to cause is not
        // treated as a crash.
        self.auto_restart_armed = false;

        let Some(running) = self.running.as_mut() else {
            return Err(JobErrorKind::NotRunning);
        };

        let signal = self.definition.stop_signal();
        let mut causes = StopCauses::default();

        debug!(service = %self.name, pid = ?running.pid, signal = %signal, "Stopping service");
        if let Err(e) = running.signal(signal).await {
            causes.push(StopCause::Signal {
                message: e.to_string(),
            });
        }

        match with_timeout(self.stop_timeout, running.wait_exited()).await {
            Ok(record) => {
                match record {
                    Some(record) => {
                        if let Some(message) = record.error.clone() {
                            causes.push(StopCause::Wait { message });
                        }
                        self.last_exit_code = record.code;
                    }
                    None => causes.push(StopCause::Wait {
                        message: "exit watcher ended without a status".to_string(),
                    }),
                }
                self.running = None;
                self.state = JobState::Stopped;
                info!(service = %self.name, "Service stopped");
            }
            Err(timeout) => {
                // Keep the handle: the process may still be alive and a new
                // start must not run alongside it.
                warn!(
                    service = %self.name,
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "Process did not exit before the stop deadline"
                );
                causes.push(timeout);
            }
        }

        if causes.is_empty() {
            Ok(())
        } else {
            Err(JobErrorKind::Stop { causes })
        }
    }

    fn on_exit(&mut self, generation: u64, record: ExitRecord) {
        match &self.running {
            Some(running) if running.generation == generation => {}
            _ => {
                debug!(service = %self.name, generation, "Ignoring exit of a released process");
                return;
            }
        }

        self.running = None;
        self.state = JobState::Stopped;
        self.last_exit_code = record.code;

        match &record.error {
            Some(e) => warn!(service = %self.name, error = %e, "Process exited (wait failed)"),
            None => info!(
                service = %self.name,
                exit_code = ?record.code,
                signal = ?record.signal,
                "Process exited"
            ),
        }

        if self.auto_restart_armed {
            info!(service = %self.name, "Restarting service after unexpected exit");
            if let Err(e) = self.start() {
                error!(service = %self.name, error = %e, "Automatic restart failed");
            }
        }
    }

    fn status(&self) -> JobStatus {
        JobStatus {
            name: self.name.to_string(),
            state: self.state,
            start_count: self.start_count,
            auto_restart_armed: self.auto_restart_armed,
            enabled: self.definition.is_enabled(),
            pid: self.running.as_ref().and_then(|r| r.pid),
            last_exit_code: self.last_exit_code,
            started_at: self.running.as_ref().map(|r| r.started_at),
        }
    }
}

/// Own `child` until it exits, then report the exit to the job.
async fn watch_process(
    name: Arc<str>,
    mut child: Child,
    generation: u64,
    mailbox: mpsc::WeakSender<JobCommand>,
    mut signal_rx: mpsc::Receiver<SignalRequest>,
    exit_tx: watch::Sender<Option<ExitRecord>>,
) {
    let record = loop {
        tokio::select! {
            status = child.wait() => {
                break match status {
                    Ok(status) => ExitRecord {
                        code: status.code(),
                        signal: status.signal(),
                        error: None,
                    },
                    Err(e) => ExitRecord {
                        code: None,
                        signal: None,
                        error: Some(e.to_string()),
                    },
                };
            }
            request = signal_rx.recv() => match request {
                Some(SignalRequest { signal, reply }) => {
                    let _ = reply.send(signal_child(&child, signal));
                }
                None => {
                    // Job is gone; dropping the child kills it.
                    debug!(service = %name, generation, "Job released, killing its process");
                    return;
                }
            },
        }
    };

    // Unblock any stop still waiting on a signal reply before we wait on the
    // mailbox, which that stop is holding up.
    drop(signal_rx);
    let _ = exit_tx.send(Some(record.clone()));

    if let Some(mailbox) = mailbox.upgrade() {
        let _ = mailbox.send(JobCommand::Exited { generation, record }).await;
    }
}
