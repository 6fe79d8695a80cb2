//! PID file management for the worker pool process.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::DaemonError;

#[cfg(test)]
#[path = "pid_tests.rs"]
mod tests;

/// Records the worker pool's PID so `worker stop` and `status` can find
/// it, and prevents a second pool from starting against the same file.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    owned: bool,
}

impl PidFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            owned: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the recorded PID, if the file exists.
    pub fn read(&self) -> Result<Option<u32>, DaemonError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path).map_err(|e| DaemonError::PidFileRead {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let pid = contents
            .trim()
            .parse::<u32>()
            .map_err(|e| DaemonError::PidFileRead {
                path: self.path.clone(),
                reason: format!("invalid PID: {e}"),
            })?;

        Ok(Some(pid))
    }

    /// The PID of a currently-running pool, if any. A stale file (process
    /// gone) reads as not running.
    pub fn running_pid(&self) -> Result<Option<u32>, DaemonError> {
        match self.read()? {
            Some(pid) if is_process_running(pid) => Ok(Some(pid)),
            _ => Ok(None),
        }
    }

    /// Claim the file for the current process. A live owner is an error; a
    /// stale file is replaced.
    pub fn acquire(&mut self) -> Result<(), DaemonError> {
        if let Some(existing) = self.read()? {
            if is_process_running(existing) {
                return Err(DaemonError::AlreadyRunning {
                    path: self.path.clone(),
                    pid: existing,
                });
            }
            warn!(
                "Removing stale PID file (PID {} not running): {}",
                existing,
                self.path.display()
            );
            self.remove()?;
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| DaemonError::PidFileWrite {
                path: self.path.clone(),
                reason: format!("failed to create parent directory: {e}"),
            })?;
        }

        let pid = std::process::id();
        fs::write(&self.path, pid.to_string()).map_err(|e| DaemonError::PidFileWrite {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        self.owned = true;
        info!("PID file created: {} (PID {})", self.path.display(), pid);
        Ok(())
    }

    /// Remove the file.
    pub fn remove(&mut self) -> Result<(), DaemonError> {
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| DaemonError::PidFileRemoval {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        }
        self.owned = false;
        Ok(())
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = self.remove() {
                warn!("Failed to remove PID file on drop: {}", e);
            }
        }
    }
}

/// Whether a process with this PID exists (signal-0 probe).
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub fn is_process_running(_pid: u32) -> bool {
    true
}
