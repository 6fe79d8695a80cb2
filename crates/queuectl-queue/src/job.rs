//! Job definition and lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker holding a live lease.
    Processing,
    /// Finished successfully. Terminal.
    Completed,
    /// Failed, waiting out its backoff before the next claim.
    Failed,
    /// Retries exhausted; parked in the dead letter queue.
    Dead,
}

impl JobState {
    /// All states, in display order.
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// Parse a state from its wire/storage form.
    pub fn parse(s: &str) -> Option<JobState> {
        match s {
            "pending" => Some(JobState::Pending),
            "processing" => Some(JobState::Processing),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "dead" => Some(JobState::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload for enqueueing a job, as accepted on the CLI:
/// `{"id": "job1", "command": "echo hello"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Caller-supplied unique id. Never generated.
    pub id: String,
    /// Opaque shell command line.
    pub command: String,
}

/// A job row as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique id, immutable after creation.
    pub id: String,
    /// Opaque shell command line.
    pub command: String,
    /// Current lifecycle state.
    pub state: JobState,
    /// Execution attempts started so far. Incremented at claim time,
    /// never decremented.
    pub attempts: u32,
    /// Lease token of the claiming worker. Set iff `state == Processing`.
    pub lease_owner: Option<String>,
    /// Lease expiry. Set iff `state == Processing`.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Earliest time the job may be claimed again (backoff gate).
    pub next_run_at: Option<DateTime<Utc>>,
    /// Most recent failure detail.
    pub last_error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether the job could be handed to a worker at `now`:
    /// pending or failed, with any backoff delay elapsed.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        if !matches!(self.state, JobState::Pending | JobState::Failed) {
            return false;
        }
        match self.next_run_at {
            Some(next_run) => next_run <= now,
            None => true,
        }
    }

    /// Whether a worker currently holds an unexpired lease.
    pub fn has_live_lease(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Processing
            && self.lease_expires_at.is_some_and(|expires| expires > now)
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
