//! Durable job store backed by SQLite.
//!
//! Every cross-worker coordination point lives here: the atomic claim, the
//! lease-checked completion/failure updates, and the expired-lease sweep.
//! All of them are single conditional statements (or one short transaction)
//! so there is no read-then-write window between concurrent callers.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, OptionalExtension, ToSql};
use tokio_rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::job::{Job, JobState};
use crate::schema::init_schema;

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

const JOB_COLUMNS: &str =
    "id, command, state, attempts, lease_owner, lease_expires_at, next_run_at, last_error, created_at, updated_at";

/// SQLite-backed job store.
pub struct JobStore {
    conn: Connection,
}

impl JobStore {
    /// Open (or create) the database at `path`. Failure here is fatal to
    /// the caller; nothing else works without the store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| QueueError::Database(format!("Failed to create {:?}: {}", parent, e)))?;
        }

        let conn = Connection::open(path.clone())
            .await
            .map_err(|e| QueueError::Database(format!("Failed to open {:?}: {}", path, e)))?;

        conn.call(|conn| Ok(init_schema(conn)?)).await?;

        debug!("JobStore opened at {:?}", path);
        Ok(Self { conn })
    }

    /// Open an in-memory database (tests).
    pub async fn in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| QueueError::Database(e.to_string()))?;

        conn.call(|conn| Ok(init_schema(conn)?)).await?;

        Ok(Self { conn })
    }

    /// Insert a new pending job. Rejects an existing id outright.
    pub async fn insert(
        &self,
        id: &str,
        command: &str,
        now: DateTime<Utc>,
    ) -> Result<Job, QueueError> {
        let id = id.to_string();
        let command = command.to_string();
        let ts = encode_ts(now);

        let id_for_err = id.clone();
        let result = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO jobs (id, command, state, attempts, created_at, updated_at)
                     VALUES (?1, ?2, 'pending', 0, ?3, ?3)",
                    params![id, command, ts],
                )?;
                let job = conn.query_row(
                    &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                    [id],
                    decode_job,
                )?;
                Ok(job)
            })
            .await;

        match result {
            Ok(job) => Ok(job),
            Err(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _)))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(QueueError::DuplicateId(id_for_err))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically claim the oldest claimable job: flip it to `processing`
    /// with a fresh lease token and a charged attempt, all in one
    /// conditional update. Returns `None` when nothing is claimable.
    pub async fn claim(
        &self,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Result<Option<Job>, QueueError> {
        let lease_owner = Uuid::new_v4().to_string();
        let now_ms = now.timestamp_millis();
        let lease_expires_ms = now_ms + lease_duration.as_millis() as i64;
        let ts = encode_ts(now);

        let job = self
            .conn
            .call(move |conn| {
                let job = conn
                    .query_row(
                        &format!(
                            "UPDATE jobs
                             SET state = 'processing',
                                 lease_owner = ?1,
                                 lease_expires_at = ?2,
                                 attempts = attempts + 1,
                                 updated_at = ?3
                             WHERE id = (
                                 SELECT id FROM jobs
                                 WHERE state IN ('pending', 'failed')
                                   AND (next_run_at IS NULL OR next_run_at <= ?4)
                                 ORDER BY created_at ASC
                                 LIMIT 1
                             )
                             RETURNING {JOB_COLUMNS}"
                        ),
                        params![lease_owner, lease_expires_ms, ts, now_ms],
                        decode_job,
                    )
                    .optional()?;
                Ok(job)
            })
            .await?;

        if let Some(ref job) = job {
            debug!(
                "Claimed job {} (attempt {}, lease {})",
                job.id,
                job.attempts,
                job.lease_owner.as_deref().unwrap_or("-")
            );
        }
        Ok(job)
    }

    /// Mark a job completed, but only for the worker that still owns it.
    pub async fn complete(
        &self,
        id: &str,
        lease_owner: &str,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let id = id.to_string();
        let lease_owner = lease_owner.to_string();
        let ts = encode_ts(now);

        let id_for_err = id.clone();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE jobs
                     SET state = 'completed',
                         lease_owner = NULL,
                         lease_expires_at = NULL,
                         updated_at = ?3
                     WHERE id = ?1 AND lease_owner = ?2 AND state = 'processing'",
                    params![id, lease_owner, ts],
                )?;
                Ok(changed)
            })
            .await?;

        if changed == 0 {
            return Err(QueueError::LeaseMismatch(id_for_err));
        }
        Ok(())
    }

    /// Record a failed attempt for the owning worker. Transitions to
    /// `failed` with an exponential backoff gate while the retry budget
    /// holds, to `dead` once `attempts > max_retries`. Returns the
    /// resulting state.
    pub async fn fail(
        &self,
        id: &str,
        lease_owner: &str,
        error: &str,
        policy: QueueConfig,
        now: DateTime<Utc>,
    ) -> Result<JobState, QueueError> {
        let id = id.to_string();
        let lease_owner = lease_owner.to_string();
        let error = error.to_string();
        let now_ms = now.timestamp_millis();
        let ts = encode_ts(now);

        let id_for_err = id.clone();
        let new_state = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                // The ownership predicate also guards the read: only the
                // lease holder reaches the update, and attempts cannot move
                // under a live lease.
                let attempts: Option<u32> = tx
                    .query_row(
                        "SELECT attempts FROM jobs
                         WHERE id = ?1 AND lease_owner = ?2 AND state = 'processing'",
                        params![id, lease_owner],
                        |row| row.get(0),
                    )
                    .optional()?;

                let Some(attempts) = attempts else {
                    return Ok(None);
                };

                let (new_state, next_run_ms) = if attempts > policy.max_retries {
                    (JobState::Dead, None)
                } else {
                    let delay_ms = policy.backoff_delay_secs(attempts) as i64 * 1_000;
                    (JobState::Failed, Some(now_ms + delay_ms))
                };

                tx.execute(
                    "UPDATE jobs
                     SET state = ?3,
                         next_run_at = ?4,
                         last_error = ?5,
                         lease_owner = NULL,
                         lease_expires_at = NULL,
                         updated_at = ?6
                     WHERE id = ?1 AND lease_owner = ?2 AND state = 'processing'",
                    params![id, lease_owner, new_state, next_run_ms, error, ts],
                )?;

                tx.commit()?;
                Ok(Some(new_state))
            })
            .await?;

        match new_state {
            Some(state) => {
                if state == JobState::Dead {
                    info!("Job {} moved to dead letter queue", id_for_err);
                }
                Ok(state)
            }
            None => Err(QueueError::LeaseMismatch(id_for_err)),
        }
    }

    /// Revert every `processing` job whose lease lapsed before `now` to
    /// `failed`, immediately claimable. The attempt was already charged at
    /// claim time, so attempts is left alone. Returns the number reclaimed.
    pub async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<u64, QueueError> {
        let now_ms = now.timestamp_millis();
        let ts = encode_ts(now);

        let reclaimed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE jobs
                     SET state = 'failed',
                         lease_owner = NULL,
                         lease_expires_at = NULL,
                         next_run_at = ?1,
                         updated_at = ?2
                     WHERE state = 'processing' AND lease_expires_at < ?1",
                    params![now_ms, ts],
                )?;
                Ok(changed as u64)
            })
            .await?;

        if reclaimed > 0 {
            info!("Reclaimed {} expired lease(s)", reclaimed);
        }
        Ok(reclaimed)
    }

    /// Move a dead job back to `pending` with a fresh retry budget.
    pub async fn dlq_retry(&self, id: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        let id = id.to_string();
        let ts = encode_ts(now);

        let id_for_err = id.clone();
        let state = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let state: Option<JobState> = tx
                    .query_row("SELECT state FROM jobs WHERE id = ?1", [&id], |row| {
                        row.get(0)
                    })
                    .optional()?;

                if state == Some(JobState::Dead) {
                    tx.execute(
                        "UPDATE jobs
                         SET state = 'pending',
                             attempts = 0,
                             lease_owner = NULL,
                             lease_expires_at = NULL,
                             next_run_at = NULL,
                             updated_at = ?2
                         WHERE id = ?1",
                        params![id, ts],
                    )?;
                }

                tx.commit()?;
                Ok(state)
            })
            .await?;

        match state {
            Some(JobState::Dead) => {
                info!("Job {} moved from dead letter queue back to pending", id_for_err);
                Ok(())
            }
            Some(state) => Err(QueueError::NotInDlq { id: id_for_err, state }),
            None => Err(QueueError::NotFound(id_for_err)),
        }
    }

    /// Load a single job.
    pub async fn get(&self, id: &str) -> Result<Option<Job>, QueueError> {
        let id = id.to_string();
        let job = self
            .conn
            .call(move |conn| {
                let job = conn
                    .query_row(
                        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                        [id],
                        decode_job,
                    )
                    .optional()?;
                Ok(job)
            })
            .await?;
        Ok(job)
    }

    /// List jobs, optionally filtered by state, oldest first.
    pub async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>, QueueError> {
        let jobs = self
            .conn
            .call(move |conn| {
                let jobs = match state {
                    Some(state) => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1 ORDER BY created_at ASC"
                        ))?;
                        let rows = stmt.query_map([state], decode_job)?;
                        rows.collect::<Result<Vec<_>, _>>()?
                    }
                    None => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at ASC"
                        ))?;
                        let rows = stmt.query_map([], decode_job)?;
                        rows.collect::<Result<Vec<_>, _>>()?
                    }
                };
                Ok(jobs)
            })
            .await?;
        Ok(jobs)
    }

    /// Per-state job counts, zero-filled for all five states.
    pub async fn counts_by_state(&self) -> Result<HashMap<JobState, u64>, QueueError> {
        let raw = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, JobState>(0)?, row.get::<_, u64>(1)?))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        let mut counts: HashMap<JobState, u64> =
            JobState::ALL.iter().map(|s| (*s, 0)).collect();
        for (state, count) in raw {
            counts.insert(state, count);
        }
        Ok(counts)
    }

    /// Read the retry policy, falling back to defaults for unset keys.
    pub async fn get_config(&self) -> Result<QueueConfig, QueueError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT key, value FROM config")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        let mut config = QueueConfig::default();
        for (key, value) in rows {
            match key.as_str() {
                "max_retries" => {
                    config.max_retries = value.parse().map_err(|_| {
                        QueueError::InvalidConfig(format!("stored max_retries is not a number: {value}"))
                    })?;
                }
                "backoff_base" => {
                    config.backoff_base = value.parse().map_err(|_| {
                        QueueError::InvalidConfig(format!("stored backoff_base is not a number: {value}"))
                    })?;
                }
                _ => {}
            }
        }
        Ok(config)
    }

    /// Persist a config value. Keys outside the recognized set are
    /// rejected, as are values the policy cannot use.
    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), QueueError> {
        match key {
            "max_retries" => {
                value.parse::<u32>().map_err(|_| {
                    QueueError::InvalidConfig(format!("max_retries must be a non-negative integer, got {value:?}"))
                })?;
            }
            "backoff_base" => {
                let base: u32 = value.parse().map_err(|_| {
                    QueueError::InvalidConfig(format!("backoff_base must be a positive integer, got {value:?}"))
                })?;
                if base == 0 {
                    return Err(QueueError::InvalidConfig(
                        "backoff_base must be at least 1".to_string(),
                    ));
                }
            }
            _ => {
                return Err(QueueError::InvalidConfig(format!("unknown key: {key}")));
            }
        }

        let key = key.to_string();
        let value = value.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
                    params![key, value],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

impl FromSql for JobState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        JobState::parse(s).ok_or_else(|| {
            FromSqlError::Other(format!("unknown job state: {s}").into())
        })
    }
}

impl ToSql for JobState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

/// Fixed-width RFC 3339 so `ORDER BY created_at` sorts chronologically.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        command: row.get(1)?,
        state: row.get(2)?,
        attempts: row.get(3)?,
        lease_owner: row.get(4)?,
        lease_expires_at: row
            .get::<_, Option<i64>>(5)?
            .map(|ms| decode_millis(5, ms))
            .transpose()?,
        next_run_at: row
            .get::<_, Option<i64>>(6)?
            .map(|ms| decode_millis(6, ms))
            .transpose()?,
        last_error: row.get(7)?,
        created_at: parse_ts(8, row.get(8)?)?,
        updated_at: parse_ts(9, row.get(9)?)?,
    })
}

fn parse_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn decode_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}
