//! Worker manager errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from PID file and signal operations.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// A worker pool already owns the PID file.
    #[error("Worker pool already running (PID file: {path}, PID: {pid})")]
    AlreadyRunning { path: PathBuf, pid: u32 },

    /// No worker pool is recorded as running.
    #[error("No worker pool is running")]
    NotRunning,

    /// Failed to read or parse the PID file.
    #[error("Failed to read PID file at {path}: {reason}")]
    PidFileRead { path: PathBuf, reason: String },

    /// Failed to write the PID file.
    #[error("Failed to write PID file at {path}: {reason}")]
    PidFileWrite { path: PathBuf, reason: String },

    /// Failed to remove the PID file.
    #[error("Failed to remove PID file at {path}: {reason}")]
    PidFileRemoval { path: PathBuf, reason: String },

    /// Failed to deliver a signal to the pool process.
    #[error("Failed to signal PID {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
