//! Worker loop and pool.
//!
//! Each worker is a single poll-execute-report loop; concurrency comes from
//! running several of them, coordinated only through the store's atomic
//! claim. Command execution is synchronous from the worker's point of view:
//! a worker claims nothing new while a job runs.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::QueueError;
use crate::job::Job;
use crate::queue::JobQueue;

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;

/// Outcome of one execution attempt. A failed command is data, not an
/// engine error; it feeds the retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure(String),
}

/// Execution seam: how a claimed job's command actually runs.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &Job) -> RunOutcome;
}

/// Runs the job's command through the platform shell.
pub struct ShellRunner {
    /// Optional wall-clock limit per command. A timeout is reported as an
    /// ordinary failure; lease expiry remains the only cancellation
    /// mechanism for truly hung commands.
    command_timeout: Option<Duration>,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            command_timeout: None,
        }
    }

    pub fn with_timeout(command_timeout: Duration) -> Self {
        Self {
            command_timeout: Some(command_timeout),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobRunner for ShellRunner {
    async fn run(&self, job: &Job) -> RunOutcome {
        let (shell, flag) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        let mut command = Command::new(shell);
        command.arg(flag).arg(&job.command);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return RunOutcome::Failure(format!("failed to spawn: {e}")),
        };

        let status = match self.command_timeout {
            Some(limit) => match timeout(limit, wait_collect(child)).await {
                Ok(status) => status,
                Err(_) => {
                    return RunOutcome::Failure(format!(
                        "timed out after {}s",
                        limit.as_secs()
                    ));
                }
            },
            None => wait_collect(child).await,
        };

        match status {
            Ok(status) if status.success() => RunOutcome::Success,
            Ok(status) => RunOutcome::Failure(match status.code() {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            }),
            Err(e) => RunOutcome::Failure(format!("wait failed: {e}")),
        }
    }
}

async fn wait_collect(mut child: tokio::process::Child) -> std::io::Result<process::ExitStatus> {
    child.wait().await
}

/// A single polling worker.
pub struct Worker {
    id: String,
    queue: Arc<JobQueue>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(queue: Arc<JobQueue>, poll_interval: Duration) -> Self {
        Self {
            id: format!("{}-{}", process::id(), Uuid::new_v4()),
            queue,
            poll_interval,
        }
    }

    /// Worker label, for logs. The lease token is per-claim, not per-worker.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Claim and execute at most one job. Returns whether a job ran.
    pub async fn process_one<R: JobRunner>(&self, runner: &R) -> Result<bool, QueueError> {
        let Some(job) = self.queue.claim().await? else {
            return Ok(false);
        };

        // claim() always returns the row it just leased
        let lease_owner = job.lease_owner.clone().unwrap_or_default();
        info!("Worker {} processing job {}: {}", self.id, job.id, job.command);

        let report = match runner.run(&job).await {
            RunOutcome::Success => self.queue.report_success(&job.id, &lease_owner).await,
            RunOutcome::Failure(detail) => {
                warn!("Worker {} job {} failed: {}", self.id, job.id, detail);
                self.queue
                    .report_failure(&job.id, &lease_owner, &detail)
                    .await
                    .map(|_| ())
            }
        };

        match report {
            Ok(()) => Ok(true),
            // The lease lapsed mid-run and someone else owns the job now;
            // whatever they decide stands.
            Err(QueueError::LeaseMismatch(id)) => {
                warn!("Worker {} lost lease on job {}; dropping result", self.id, id);
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Poll-execute-report until shutdown is broadcast. An in-flight job
    /// finishes before the worker exits.
    pub async fn run<R: JobRunner>(&self, runner: &R, mut shutdown: broadcast::Receiver<()>) {
        info!("Worker {} started", self.id);

        loop {
            match self.process_one(runner).await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!("Worker {} store error: {}", self.id, e);
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }

            if shutdown.try_recv().is_ok() {
                break;
            }
        }

        info!("Worker {} stopped", self.id);
    }
}

/// Pool of N workers plus a maintenance task sweeping expired leases.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    config: WorkerConfig,
    shutdown: broadcast::Sender<()>,
}

impl WorkerPool {
    pub fn new(queue: Arc<JobQueue>, config: WorkerConfig) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            queue,
            config,
            shutdown,
        }
    }

    /// Handle for requesting shutdown from outside the pool (signal
    /// handlers, tests).
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Broadcast shutdown to every worker and the reclaim task.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Run workers and the reclaim sweep until shutdown, then join them.
    pub async fn run<R: JobRunner + 'static>(&self, runner: Arc<R>) {
        info!("Worker pool starting {} worker(s)", self.config.workers);

        let mut handles = Vec::new();

        for _ in 0..self.config.workers {
            let worker = Worker::new(self.queue.clone(), self.config.poll_interval());
            let runner = runner.clone();
            let shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                worker.run(runner.as_ref(), shutdown).await;
            }));
        }

        // One sweep task per pool is enough; reclaim is idempotent and any
        // pool on the same store may run it.
        let queue = self.queue.clone();
        let interval = self.config.reclaim_interval();
        let mut shutdown = self.shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = queue.reclaim_expired().await {
                            error!("Reclaim sweep failed: {}", e);
                        }
                    }
                }
            }
        }));

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker task panicked: {}", e);
            }
        }

        info!("Worker pool stopped");
    }

    /// Workers configured for this pool.
    pub fn worker_count(&self) -> u32 {
        self.config.workers
    }
}
