//! Database schema management.

use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Job table. The dead letter queue is the set of rows with state = 'dead',
-- not a separate table; jobs are never physically deleted.
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    command TEXT NOT NULL,
    state TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    lease_owner TEXT DEFAULT NULL,       -- lease token; set iff state = 'processing'
    lease_expires_at INTEGER DEFAULT NULL, -- unix ms; set iff state = 'processing'
    next_run_at INTEGER DEFAULT NULL,    -- unix ms; backoff gate
    last_error TEXT DEFAULT NULL,
    created_at TEXT NOT NULL,            -- RFC 3339
    updated_at TEXT NOT NULL             -- RFC 3339
);

-- Runtime configuration (max_retries, backoff_base), one row per key.
CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- The claim predicate scans by state and next_run_at, oldest first.
CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
CREATE INDEX IF NOT EXISTS idx_jobs_claimable ON jobs(state, next_run_at, created_at);
CREATE INDEX IF NOT EXISTS idx_jobs_lease ON jobs(state, lease_expires_at);
"#;
