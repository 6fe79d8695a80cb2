//! Shutdown signal plumbing for the worker pool.

use tracing::info;

use crate::error::DaemonError;

/// Resolve when the process receives SIGTERM or SIGINT (ctrl-c).
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint =
        signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("Received SIGINT, shutting down"),
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received ctrl-c, shutting down");
}

/// Ask a running pool process to shut down gracefully.
#[cfg(unix)]
pub fn stop_process(pid: u32) -> Result<(), DaemonError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| DaemonError::Signal {
        pid,
        reason: e.to_string(),
    })?;
    info!("Sent SIGTERM to worker pool PID {}", pid);
    Ok(())
}

#[cfg(not(unix))]
pub fn stop_process(pid: u32) -> Result<(), DaemonError> {
    Err(DaemonError::Signal {
        pid,
        reason: "graceful stop is only supported on unix".to_string(),
    })
}
