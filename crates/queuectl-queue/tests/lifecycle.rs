//! End-to-end lifecycle tests: concurrent claiming, crash recovery via
//! lease reclaim, retry exhaustion, and the DLQ round trip.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use queuectl_queue::{
    Job, JobQueue, JobRunner, JobState, JobStore, QueueConfig, QueueError, RunOutcome,
    WorkerConfig, WorkerPool,
};

fn t(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

const LEASE: Duration = Duration::from_secs(30);

struct AlwaysSucceeds;

#[async_trait]
impl JobRunner for AlwaysSucceeds {
    async fn run(&self, _job: &Job) -> RunOutcome {
        RunOutcome::Success
    }
}

struct CountedFailure {
    runs: AtomicU32,
}

#[async_trait]
impl JobRunner for CountedFailure {
    async fn run(&self, _job: &Job) -> RunOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        RunOutcome::Failure("exit code 1".to_string())
    }
}

/// K concurrent claimers racing for M jobs (K > M): exactly M claims
/// succeed, the rest see an empty queue, and no job is handed out twice.
#[tokio::test]
async fn at_most_one_active_claim() {
    const JOBS: usize = 5;
    const CLAIMERS: usize = 20;

    let store = Arc::new(JobStore::in_memory().await.unwrap());
    for i in 0..JOBS {
        store
            .insert(&format!("job{i}"), "echo hi", t(100 + i as i64))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..CLAIMERS {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.claim(t(200), LEASE).await.unwrap()
        }));
    }

    let mut claimed_ids = Vec::new();
    let mut misses = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Some(job) => claimed_ids.push(job.id),
            None => misses += 1,
        }
    }

    assert_eq!(claimed_ids.len(), JOBS);
    assert_eq!(misses, CLAIMERS - JOBS);

    claimed_ids.sort();
    claimed_ids.dedup();
    assert_eq!(claimed_ids.len(), JOBS, "a job was claimed twice");
}

/// Every enqueued job eventually completes when workers keep polling and
/// the runner succeeds.
#[tokio::test]
async fn no_lost_jobs_under_worker_pool() {
    const JOBS: usize = 20;

    let store = Arc::new(JobStore::in_memory().await.unwrap());
    let queue = Arc::new(JobQueue::new(store));
    for i in 0..JOBS {
        queue.enqueue(&format!("job{i}"), "echo hi").await.unwrap();
    }

    let config = WorkerConfig {
        workers: 4,
        poll_interval_ms: 10,
        lease_secs: 30,
        reclaim_interval_ms: 50,
    };
    let pool = WorkerPool::new(queue.clone(), config);
    let shutdown = pool.shutdown_handle();

    let queue_for_watch = queue.clone();
    tokio::spawn(async move {
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            let counts = queue_for_watch.counts().await.unwrap();
            if counts[&JobState::Completed] == JOBS as u64 {
                break;
            }
        }
        let _ = shutdown.send(());
    });

    pool.run(Arc::new(AlwaysSucceeds)).await;

    let counts = queue.counts().await.unwrap();
    assert_eq!(counts[&JobState::Completed], JOBS as u64);
    assert_eq!(counts[&JobState::Pending], 0);
    assert_eq!(counts[&JobState::Processing], 0);
    assert_eq!(counts[&JobState::Failed], 0);
}

/// An always-failing command runs exactly `max_retries + 1` times before
/// landing in the DLQ: never fewer, never more.
#[tokio::test]
async fn retry_exhaustion_runs_exact_attempt_count() {
    let store = Arc::new(JobStore::in_memory().await.unwrap());

    store.set_config("max_retries", "2").await.unwrap();
    store.set_config("backoff_base", "2").await.unwrap();
    let policy = store.get_config().await.unwrap();

    store.insert("j1", "exit 1", t(100)).await.unwrap();

    let runner = CountedFailure {
        runs: AtomicU32::new(0),
    };

    // Drive claims with an explicit clock so backoff gates are jumped
    // deterministically instead of slept through.
    let mut now = t(100);
    loop {
        let Some(job) = store.claim(now, LEASE).await.unwrap() else {
            let job = store.get("j1").await.unwrap().unwrap();
            if job.state == JobState::Dead {
                break;
            }
            now = job.next_run_at.expect("failed job must carry a backoff gate");
            continue;
        };

        runner.run(&job).await;
        let lease = job.lease_owner.unwrap();
        store
            .fail("j1", &lease, "exit code 1", policy, now)
            .await
            .unwrap();
    }

    assert_eq!(runner.runs.load(Ordering::SeqCst), 3); // max_retries + 1
    let job = store.get("j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Dead);
    assert_eq!(job.attempts, 3);
}

/// With max_retries=2 and backoff_base=2, attempt 1 gates the job
/// until t+2, attempt 2 until t+4, attempt 3 kills it.
#[tokio::test]
async fn backoff_schedule_walkthrough() {
    let store = JobStore::in_memory().await.unwrap();
    let policy = QueueConfig {
        max_retries: 2,
        backoff_base: 2,
    };
    store.insert("j1", "exit 1", t(0)).await.unwrap();

    let job = store.claim(t(0), LEASE).await.unwrap().unwrap();
    store
        .fail("j1", &job.lease_owner.unwrap(), "exit code 1", policy, t(0))
        .await
        .unwrap();
    let job = store.get("j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.next_run_at, Some(t(2)));

    let job = store.claim(t(2), LEASE).await.unwrap().unwrap();
    store
        .fail("j1", &job.lease_owner.unwrap(), "exit code 1", policy, t(2))
        .await
        .unwrap();
    let job = store.get("j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.next_run_at, Some(t(6))); // 2 + 2^2

    let job = store.claim(t(6), LEASE).await.unwrap().unwrap();
    store
        .fail("j1", &job.lease_owner.unwrap(), "exit code 1", policy, t(6))
        .await
        .unwrap();
    let job = store.get("j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Dead);

    let counts = store.counts_by_state().await.unwrap();
    assert_eq!(counts[&JobState::Dead], 1);
}

/// A claimed-but-never-reported job becomes claimable again once its lease
/// expires, and the original worker's late report is rejected without
/// corrupting the second worker's run.
#[tokio::test]
async fn lease_reclaim_recovers_crashed_worker() {
    let store = JobStore::in_memory().await.unwrap();
    store.insert("j1", "echo hi", t(100)).await.unwrap();

    // worker A claims and "crashes"
    let job = store.claim(t(100), LEASE).await.unwrap().unwrap();
    let stale_lease = job.lease_owner.unwrap();

    // not claimable while the lease is live
    assert!(store.claim(t(110), LEASE).await.unwrap().is_none());

    // sweep after expiry
    let reclaimed = store.reclaim_expired(t(131)).await.unwrap();
    assert_eq!(reclaimed, 1);

    // worker B claims it
    let job = store.claim(t(131), LEASE).await.unwrap().unwrap();
    assert_eq!(job.id, "j1");
    assert_eq!(job.attempts, 2);
    let live_lease = job.lease_owner.unwrap();

    // worker A comes back from the dead; both report paths must bounce
    assert!(matches!(
        store.complete("j1", &stale_lease, t(132)).await.unwrap_err(),
        QueueError::LeaseMismatch(_)
    ));
    assert!(matches!(
        store
            .fail("j1", &stale_lease, "late", QueueConfig::default(), t(132))
            .await
            .unwrap_err(),
        QueueError::LeaseMismatch(_)
    ));

    // worker B's result stands
    store.complete("j1", &live_lease, t(133)).await.unwrap();
    assert_eq!(
        store.get("j1").await.unwrap().unwrap().state,
        JobState::Completed
    );
}

/// DLQ round trip: dead -> pending via dlq_retry, then a successful run
/// completes it; dlq_retry on a non-dead job is a user error.
#[tokio::test]
async fn dlq_retry_round_trip() {
    let store = Arc::new(JobStore::in_memory().await.unwrap());
    let policy = QueueConfig {
        max_retries: 0,
        backoff_base: 2,
    };

    store.insert("j1", "flaky-command", t(100)).await.unwrap();
    let job = store.claim(t(100), LEASE).await.unwrap().unwrap();
    store
        .fail("j1", &job.lease_owner.unwrap(), "exit code 1", policy, t(100))
        .await
        .unwrap();
    assert_eq!(store.get("j1").await.unwrap().unwrap().state, JobState::Dead);

    store.dlq_retry("j1", t(200)).await.unwrap();
    let job = store.get("j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 0);

    // this time it works
    let job = store.claim(t(200), LEASE).await.unwrap().unwrap();
    store
        .complete("j1", &job.lease_owner.unwrap(), t(201))
        .await
        .unwrap();
    assert_eq!(
        store.get("j1").await.unwrap().unwrap().state,
        JobState::Completed
    );

    assert!(matches!(
        store.dlq_retry("j1", t(202)).await.unwrap_err(),
        QueueError::NotInDlq { .. }
    ));
}

/// Workers on separate store handles over the same database file still
/// coordinate correctly through SQLite.
#[tokio::test]
async fn separate_store_handles_share_one_queue() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("queue.db");

    let store_a = JobStore::open(&db).await.unwrap();
    let store_b = JobStore::open(&db).await.unwrap();

    store_a.insert("j1", "echo hi", t(100)).await.unwrap();

    let job = store_b.claim(t(100), LEASE).await.unwrap().unwrap();
    assert_eq!(job.id, "j1");

    // handle A sees the lease taken by handle B
    assert!(store_a.claim(t(101), LEASE).await.unwrap().is_none());
    let seen = store_a.get("j1").await.unwrap().unwrap();
    assert_eq!(seen.state, JobState::Processing);

    store_b
        .complete("j1", &job.lease_owner.unwrap(), t(102))
        .await
        .unwrap();
    assert_eq!(
        store_a.get("j1").await.unwrap().unwrap().state,
        JobState::Completed
    );
}
