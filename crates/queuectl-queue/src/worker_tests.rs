
use super::*;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::job::JobState;
use crate::store::JobStore;

struct AlwaysSucceeds;

#[async_trait]
impl JobRunner for AlwaysSucceeds {
    async fn run(&self, _job: &Job) -> RunOutcome {
        RunOutcome::Success
    }
}

struct AlwaysFails {
    runs: AtomicU32,
}

impl AlwaysFails {
    fn new() -> Self {
        Self {
            runs: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl JobRunner for AlwaysFails {
    async fn run(&self, _job: &Job) -> RunOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        RunOutcome::Failure("exit code 1".to_string())
    }
}

async fn queue() -> Arc<JobQueue> {
    let store = Arc::new(JobStore::in_memory().await.unwrap());
    Arc::new(JobQueue::new(store))
}

fn worker(queue: &Arc<JobQueue>) -> Worker {
    Worker::new(queue.clone(), Duration::from_millis(10))
}

#[tokio::test]
async fn test_process_one_empty_queue() {
    let queue = queue().await;
    let worker = worker(&queue);

    let ran = worker.process_one(&AlwaysSucceeds).await.unwrap();
    assert!(!ran);
}

#[tokio::test]
async fn test_process_one_success() {
    let queue = queue().await;
    queue.enqueue("j1", "echo hello").await.unwrap();

    let worker = worker(&queue);
    assert!(worker.process_one(&AlwaysSucceeds).await.unwrap());

    let job = queue.get("j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 1);
}

#[tokio::test]
async fn test_process_one_failure_schedules_retry() {
    let queue = queue().await;
    queue.enqueue("j1", "false").await.unwrap();

    let worker = worker(&queue);
    let runner = AlwaysFails::new();
    assert!(worker.process_one(&runner).await.unwrap());

    let job = queue.get("j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.last_error.as_deref(), Some("exit code 1"));
    assert!(job.next_run_at.is_some());
    assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shell_runner_exit_codes() {
    let runner = ShellRunner::new();
    let queue = queue().await;

    let ok = queue.enqueue("ok", "exit 0").await.unwrap();
    assert_eq!(runner.run(&ok).await, RunOutcome::Success);

    let bad = queue.enqueue("bad", "exit 3").await.unwrap();
    match runner.run(&bad).await {
        RunOutcome::Failure(detail) => assert!(detail.contains("3"), "got {detail}"),
        RunOutcome::Success => panic!("expected failure"),
    }
}

#[tokio::test]
async fn test_shell_runner_timeout() {
    let runner = ShellRunner::with_timeout(Duration::from_millis(100));
    let queue = queue().await;

    let job = queue.enqueue("slow", "sleep 5").await.unwrap();
    match runner.run(&job).await {
        RunOutcome::Failure(detail) => assert!(detail.contains("timed out"), "got {detail}"),
        RunOutcome::Success => panic!("expected timeout"),
    }
}

#[tokio::test]
async fn test_worker_run_drains_queue_until_shutdown() {
    let queue = queue().await;
    for i in 0..5 {
        queue.enqueue(&format!("j{i}"), "echo hi").await.unwrap();
    }

    let worker = worker(&queue);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = {
        let queue = queue.clone();
        tokio::spawn(async move {
            worker.run(&AlwaysSucceeds, shutdown_rx).await;
            queue.counts().await.unwrap()
        })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_tx.send(()).unwrap();
    let counts = handle.await.unwrap();

    assert_eq!(counts[&JobState::Completed], 5);
    assert_eq!(counts[&JobState::Pending], 0);
}

#[tokio::test]
async fn test_pool_runs_and_shuts_down() {
    let queue = queue().await;
    for i in 0..8 {
        queue.enqueue(&format!("j{i}"), "echo hi").await.unwrap();
    }

    let config = WorkerConfig {
        workers: 3,
        poll_interval_ms: 10,
        lease_secs: 30,
        reclaim_interval_ms: 50,
    };
    let pool = WorkerPool::new(queue.clone(), config);
    assert_eq!(pool.worker_count(), 3);

    let shutdown = pool.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = shutdown.send(());
    });

    pool.run(Arc::new(AlwaysSucceeds)).await;

    let counts = queue.counts().await.unwrap();
    assert_eq!(counts[&JobState::Completed], 8);
}
