//! Worker pool process management for queuectl.
//!
//! A `worker start` runs the pool in the foreground and records its PID so
//! a later `worker stop` (or `status`) can find it. This crate owns that
//! PID file plus the signal plumbing on both sides.

pub mod error;
pub mod pid;
pub mod signal;

pub use error::DaemonError;
pub use pid::PidFile;
pub use signal::{shutdown_signal, stop_process};
