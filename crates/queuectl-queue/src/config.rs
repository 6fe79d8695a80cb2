//! Queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff delays are capped at one day.
const MAX_BACKOFF_SECS: u64 = 86_400;

/// Retry policy, persisted in the store's config table and read at
/// transition time. A `config set` applies to the next transition
/// evaluated, not retroactively to already-scheduled jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum retries after the first attempt. Zero means a single
    /// attempt only: any failure goes straight to the dead letter queue.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base of the exponential backoff, in seconds.
    #[serde(default = "default_backoff_base")]
    pub backoff_base: u32,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base() -> u32 {
    2
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
        }
    }
}

impl QueueConfig {
    /// Delay before a job that has failed `attempts` times becomes
    /// claimable again: `backoff_base ^ attempts` seconds.
    pub fn backoff_delay_secs(&self, attempts: u32) -> u64 {
        (self.backoff_base as u64)
            .checked_pow(attempts)
            .unwrap_or(u64::MAX)
            .min(MAX_BACKOFF_SECS)
    }
}

/// Worker pool settings. Not persisted; supplied per `worker start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Idle sleep between claim attempts.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Lease duration granted on each claim, in seconds.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// Interval between reclaim sweeps for expired leases.
    #[serde(default = "default_reclaim_interval_ms")]
    pub reclaim_interval_ms: u64,
}

fn default_workers() -> u32 {
    1
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_lease_secs() -> u64 {
    30
}

fn default_reclaim_interval_ms() -> u64 {
    5_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_secs: default_lease_secs(),
            reclaim_interval_ms: default_reclaim_interval_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
