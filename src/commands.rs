//! Command handlers for queuectl.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use queuectl_daemon::{shutdown_signal, stop_process, PidFile};
use queuectl_queue::{
    Job, JobQueue, JobState, JobStore, NewJob, ShellRunner, WorkerConfig, WorkerPool,
};

use crate::cli::{ConfigAction, DlqAction, WorkerAction};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Default database location: ~/.queuectl/queue.db
pub(crate) fn default_db_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let home = dirs::home_dir().ok_or("could not determine home directory")?;
    Ok(home.join(".queuectl").join("queue.db"))
}

fn default_pid_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let home = dirs::home_dir().ok_or("could not determine home directory")?;
    Ok(home.join(".queuectl").join("workers.pid"))
}

async fn open_queue(db: &Path) -> Result<Arc<JobQueue>, Box<dyn std::error::Error>> {
    let store = Arc::new(JobStore::open(db).await?);
    Ok(Arc::new(JobQueue::new(store)))
}

pub(crate) async fn handle_init(db: &Path) -> CliResult {
    JobStore::open(db).await?;
    println!("Database initialized at {}", db.display());
    Ok(())
}

pub(crate) async fn handle_enqueue(db: &Path, job_json: &str) -> CliResult {
    let new: NewJob =
        serde_json::from_str(job_json).map_err(|e| format!("invalid job JSON: {e}"))?;

    let queue = open_queue(db).await?;
    let job = queue.enqueue(&new.id, &new.command).await?;
    println!("Job {} enqueued.", job.id);
    Ok(())
}

pub(crate) async fn handle_list(db: &Path, state: Option<&str>, format: &str) -> CliResult {
    let state = match state {
        Some(raw) => Some(
            JobState::parse(raw)
                .ok_or_else(|| format!("unknown state: {raw} (expected one of pending, processing, completed, failed, dead)"))?,
        ),
        None => None,
    };

    let queue = open_queue(db).await?;
    let jobs = queue.list(state).await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&jobs)?),
        _ => print_job_table(&jobs),
    }
    Ok(())
}

fn print_job_table(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs found.");
        return;
    }

    println!(
        "{:<20} {:<30} {:<12} {:>8} {}",
        "ID", "COMMAND", "STATE", "ATTEMPTS", "UPDATED"
    );
    println!("{}", "-".repeat(90));
    for job in jobs {
        println!(
            "{:<20} {:<30} {:<12} {:>8} {}",
            job.id,
            job.command,
            job.state,
            job.attempts,
            job.updated_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
}

pub(crate) async fn handle_status(db: &Path, pid_file: Option<&Path>) -> CliResult {
    let queue = open_queue(db).await?;
    let counts = queue.counts().await?;

    for state in JobState::ALL {
        print!("{:<12}", state.to_string());
    }
    println!();
    for state in JobState::ALL {
        print!("{:<12}", counts.get(&state).copied().unwrap_or(0));
    }
    println!();

    let pid_path = match pid_file {
        Some(path) => path.to_path_buf(),
        None => default_pid_path()?,
    };
    match PidFile::new(pid_path).running_pid()? {
        Some(pid) => println!("\nWorker pool: running (PID {pid})"),
        None => println!("\nWorker pool: not running"),
    }
    Ok(())
}

pub(crate) async fn handle_worker(db: &Path, action: WorkerAction) -> CliResult {
    match action {
        WorkerAction::Start {
            count,
            poll_interval_ms,
            lease_secs,
            pid_file,
        } => {
            let pid_path = match pid_file {
                Some(path) => path,
                None => default_pid_path()?,
            };
            let mut pid_file = PidFile::new(pid_path);
            pid_file.acquire()?;

            let store = Arc::new(JobStore::open(db).await?);
            let queue = Arc::new(JobQueue::with_lease_duration(
                store,
                Duration::from_secs(lease_secs),
            ));

            let config = WorkerConfig {
                workers: count,
                poll_interval_ms,
                lease_secs,
                ..WorkerConfig::default()
            };
            let pool = WorkerPool::new(queue, config);

            let shutdown = pool.shutdown_handle();
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = shutdown.send(());
            });

            println!("Starting {count} worker(s)... (ctrl-c or `queuectl worker stop` to exit)");
            pool.run(Arc::new(ShellRunner::new())).await;
            println!("All workers stopped.");
            Ok(())
        }
        WorkerAction::Stop { pid_file } => {
            let pid_path = match pid_file {
                Some(path) => path,
                None => default_pid_path()?,
            };
            match PidFile::new(pid_path).running_pid()? {
                Some(pid) => {
                    stop_process(pid)?;
                    println!("Stop requested for worker pool (PID {pid}).");
                }
                None => println!("No active worker pool found."),
            }
            Ok(())
        }
    }
}

pub(crate) async fn handle_dlq(db: &Path, action: DlqAction) -> CliResult {
    let queue = open_queue(db).await?;
    match action {
        DlqAction::List { format } => {
            let jobs = queue.dlq_list().await?;
            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&jobs)?),
                _ => print_dlq_table(&jobs),
            }
            Ok(())
        }
        DlqAction::Retry { job_id } => {
            queue.dlq_retry(&job_id).await?;
            println!("Job {job_id} moved back to queue.");
            Ok(())
        }
    }
}

fn print_dlq_table(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("Dead letter queue is empty.");
        return;
    }

    println!(
        "{:<20} {:<30} {:>8} {:<30} {}",
        "ID", "COMMAND", "ATTEMPTS", "LAST ERROR", "FAILED AT"
    );
    println!("{}", "-".repeat(110));
    for job in jobs {
        println!(
            "{:<20} {:<30} {:>8} {:<30} {}",
            job.id,
            job.command,
            job.attempts,
            job.last_error.as_deref().unwrap_or("-"),
            job.updated_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
}

pub(crate) async fn handle_config(db: &Path, action: ConfigAction) -> CliResult {
    let queue = open_queue(db).await?;
    match action {
        ConfigAction::Set { key, value } => {
            queue.set_config(&key, &value).await?;
            info!("Config updated: {} = {}", key, value);
            println!("Config {key} set to {value}.");
            Ok(())
        }
        ConfigAction::Get => {
            let config = queue.get_config().await?;
            println!("max_retries  = {}", config.max_retries);
            println!("backoff_base = {}", config.backoff_base);
            Ok(())
        }
    }
}
