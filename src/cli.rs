//! CLI definitions for queuectl.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// queuectl CLI.
#[derive(Parser)]
#[command(name = "queuectl")]
#[command(about = "Persistence-backed background job queue")]
#[command(version)]
pub(crate) struct Cli {
    /// Database path (default: ~/.queuectl/queue.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Enqueue a job: queuectl enqueue '{"id":"job1","command":"echo hello"}'
    Enqueue {
        /// Job as JSON with "id" and "command" fields
        job_json: String,
    },

    /// List jobs, optionally filtered by state
    List {
        /// Filter by state (pending, processing, completed, failed, dead)
        #[arg(long)]
        state: Option<String>,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Show per-state job counts and the active worker pool
    Status,

    /// Worker pool commands
    Worker {
        #[command(subcommand)]
        action: WorkerAction,
    },

    /// Dead letter queue commands
    Dlq {
        #[command(subcommand)]
        action: DlqAction,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Initialize the database explicitly
    Init,
}

#[derive(Subcommand)]
pub(crate) enum WorkerAction {
    /// Start a worker pool in the foreground
    Start {
        /// Number of workers
        #[arg(long, default_value_t = 1)]
        count: u32,

        /// Idle sleep between claim attempts, in milliseconds
        #[arg(long, default_value_t = 1000)]
        poll_interval_ms: u64,

        /// Lease duration per claim, in seconds
        #[arg(long, default_value_t = 30)]
        lease_secs: u64,

        /// PID file path (default: ~/.queuectl/workers.pid)
        #[arg(long)]
        pid_file: Option<PathBuf>,
    },

    /// Stop the running worker pool gracefully
    Stop {
        /// PID file path (default: ~/.queuectl/workers.pid)
        #[arg(long)]
        pid_file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub(crate) enum DlqAction {
    /// List dead letter queue jobs
    List {
        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Move a DLQ job back into the queue
    Retry {
        /// Job id
        job_id: String,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Set a configuration value (max_retries, backoff_base)
    Set { key: String, value: String },

    /// Show the current configuration
    Get,
}
