//! Job lifecycle engine.
//!
//! `JobQueue` is the single mutation path for job rows. The command surface
//! and the workers both go through it; nothing writes to the store behind
//! its back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::job::{Job, JobState};
use crate::store::JobStore;

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

/// Default lease duration granted on claim.
pub const DEFAULT_LEASE_SECS: u64 = 30;

/// The lifecycle engine: leasing, retry/backoff, and dead letter policy
/// over a durable store.
pub struct JobQueue {
    store: Arc<JobStore>,
    lease_duration: Duration,
}

impl JobQueue {
    /// Create an engine with the default lease duration.
    pub fn new(store: Arc<JobStore>) -> Self {
        Self::with_lease_duration(store, Duration::from_secs(DEFAULT_LEASE_SECS))
    }

    /// Create an engine granting leases of `lease_duration` per claim.
    pub fn with_lease_duration(store: Arc<JobStore>, lease_duration: Duration) -> Self {
        Self {
            store,
            lease_duration,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Enqueue a new job in `pending`. Duplicate ids are rejected.
    pub async fn enqueue(&self, id: &str, command: &str) -> Result<Job, QueueError> {
        if id.trim().is_empty() {
            return Err(QueueError::InvalidJob("id must not be empty".to_string()));
        }
        if command.trim().is_empty() {
            return Err(QueueError::InvalidJob(
                "command must not be empty".to_string(),
            ));
        }

        let job = self.store.insert(id, command, Utc::now()).await?;
        info!("Enqueued job {}", job.id);
        Ok(job)
    }

    /// Claim the oldest claimable job, if any. The returned job carries
    /// the lease token in `lease_owner`.
    pub async fn claim(&self) -> Result<Option<Job>, QueueError> {
        self.store.claim(Utc::now(), self.lease_duration).await
    }

    /// Report a successful execution. `LeaseMismatch` means the lease
    /// lapsed and the job is no longer the caller's; the caller must do
    /// nothing further with it.
    pub async fn report_success(&self, id: &str, lease_owner: &str) -> Result<(), QueueError> {
        self.store.complete(id, lease_owner, Utc::now()).await?;
        debug!("Job {} completed", id);
        Ok(())
    }

    /// Report a failed execution. The retry policy is read from the config
    /// table here, at decision time, so a `config set` affects the next
    /// transition rather than already-scheduled jobs. Returns the resulting
    /// state (`Failed` or `Dead`).
    pub async fn report_failure(
        &self,
        id: &str,
        lease_owner: &str,
        error: &str,
    ) -> Result<JobState, QueueError> {
        let policy = self.store.get_config().await?;
        let state = self
            .store
            .fail(id, lease_owner, error, policy, Utc::now())
            .await?;
        debug!("Job {} failed -> {}", id, state);
        Ok(state)
    }

    /// Sweep expired leases back to claimable. Returns the count reclaimed.
    pub async fn reclaim_expired(&self) -> Result<u64, QueueError> {
        self.store.reclaim_expired(Utc::now()).await
    }

    /// Per-state counts over the five states.
    pub async fn counts(&self) -> Result<HashMap<JobState, u64>, QueueError> {
        self.store.counts_by_state().await
    }

    /// List jobs by state (or all), ordered by creation time.
    pub async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>, QueueError> {
        self.store.list(state).await
    }

    /// Load one job.
    pub async fn get(&self, id: &str) -> Result<Option<Job>, QueueError> {
        self.store.get(id).await
    }

    /// The dead letter queue: jobs whose retries are exhausted.
    pub async fn dlq_list(&self) -> Result<Vec<Job>, QueueError> {
        self.store.list(Some(JobState::Dead)).await
    }

    /// Move a dead job back to `pending` with attempts reset to zero, so
    /// the operator's retry gets the full budget again.
    pub async fn dlq_retry(&self, id: &str) -> Result<(), QueueError> {
        self.store.dlq_retry(id, Utc::now()).await
    }

    /// Current retry policy.
    pub async fn get_config(&self) -> Result<QueueConfig, QueueError> {
        self.store.get_config().await
    }

    /// Update a retry policy value.
    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), QueueError> {
        self.store.set_config(key, value).await?;
        info!("Config {} set to {}", key, value);
        Ok(())
    }
}
