//! # queuectl-queue
//!
//! Job lifecycle engine for the queuectl background job queue.
//!
//! ## Features
//!
//! - Durable job storage (SQLite, WAL)
//! - Atomic lease-based claims for N concurrent workers
//! - Retry with exponential backoff and a dead letter queue
//! - Worker pool with graceful shutdown
//!
//! All coordination between workers goes through the store's conditional
//! updates; no worker holds job state in memory as the source of truth.

pub mod config;
pub mod error;
pub mod job;
pub mod queue;
pub mod schema;
pub mod store;
pub mod worker;

pub use config::{QueueConfig, WorkerConfig};
pub use error::QueueError;
pub use job::{Job, JobState, NewJob};
pub use queue::JobQueue;
pub use store::JobStore;
pub use worker::{JobRunner, RunOutcome, ShellRunner, Worker, WorkerPool};
