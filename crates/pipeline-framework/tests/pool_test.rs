use futures::future::join_all;
use pipeline_framework::{OverflowPolicy, PoolConfig, PoolError, WorkerPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn pool(core: usize, max: usize, queue: usize, policy: OverflowPolicy) -> WorkerPool {
    WorkerPool::new(
        PoolConfig::new("test")
            .with_bounds(core, max)
            .with_queue_capacity(queue)
            .with_overflow(policy),
    )
    .unwrap()
}

/// Tracks how many tasks run at once.
#[derive(Clone, Default)]
struct Gauge {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Gauge {
    async fn hold(self, duration: Duration) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(duration).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_never_exceeds_max() {
    let pool = pool(2, 4, 4, OverflowPolicy::RejectWithError);
    let gauge = Gauge::default();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let task = gauge.clone().hold(Duration::from_millis(30));
        handles.push(pool.submit(task).await.unwrap());
    }
    for result in join_all(handles).await {
        assert_eq!(result, Ok(()));
    }

    assert!(gauge.peak() <= 4, "peak {} exceeded max", gauge.peak());
    let status = pool.status();
    assert_eq!(status.completed, 8);
    assert!(status.workers <= 4);
}

#[tokio::test]
async fn saturated_pool_rejects_the_overflow() {
    let pool = pool(1, 2, 1, OverflowPolicy::RejectWithError);

    let submissions = (0..5).map(|_| pool.submit(tokio::time::sleep(Duration::from_millis(100))));
    let results = join_all(submissions).await;

    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(PoolError::QueueSaturation { .. })))
        .count();
    assert_eq!(rejected, 2);

    let accepted: Vec<_> = results.into_iter().filter_map(Result::ok).collect();
    assert_eq!(accepted.len(), 3);
    for result in join_all(accepted).await {
        assert_eq!(result, Ok(()));
    }
    assert_eq!(pool.status().rejected, 2);
}

#[tokio::test]
async fn discard_oldest_cancels_the_evicted_task() {
    let pool = pool(1, 1, 1, OverflowPolicy::DiscardOldest);

    let running = pool
        .submit(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            "running"
        })
        .await
        .unwrap();
    let evicted = pool.submit(async { "evicted" }).await.unwrap();
    let newest = pool.submit(async { "newest" }).await.unwrap();

    assert_eq!(evicted.await, Err(PoolError::Cancelled));
    assert_eq!(running.await, Ok("running"));
    assert_eq!(newest.await, Ok("newest"));

    pool.wait_idle().await;
    let status = pool.status();
    assert_eq!(status.discarded, 1);
    assert_eq!(status.submitted, 3);
    assert_eq!(status.completed + status.cancelled, status.submitted);
}

#[tokio::test]
async fn run_on_caller_executes_inline() {
    let pool = pool(1, 1, 0, OverflowPolicy::RunOnCaller);

    let busy = pool
        .submit(tokio::time::sleep(Duration::from_millis(50)))
        .await
        .unwrap();
    let inline = pool.submit(async { 7 }).await.unwrap();

    // Already resolved: the caller ran it before `submit` returned.
    assert_eq!(pool.status().caller_runs, 1);
    assert_eq!(inline.await, Ok(7));
    assert_eq!(busy.await, Ok(()));
}

#[tokio::test]
async fn graceful_shutdown_drains_queued_work() {
    let pool = pool(2, 2, 10, OverflowPolicy::RejectWithError);
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..6 {
        let done = done.clone();
        pool.submit(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            done.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    }

    let report = pool.shutdown(Duration::from_secs(2)).await;
    assert_eq!(report.submitted, 6);
    assert_eq!(report.completed, 6);
    assert_eq!(report.cancelled, 0);
    assert_eq!(report.forced, 0);
    assert_eq!(done.load(Ordering::SeqCst), 6);

    assert!(pool.is_shut_down());
    assert!(matches!(
        pool.submit(async {}).await,
        Err(PoolError::ShutDown { .. })
    ));
}

#[tokio::test]
async fn expired_grace_cancels_the_rest() {
    let pool = pool(2, 2, 10, OverflowPolicy::RejectWithError);

    let mut handles = Vec::new();
    for _ in 0..6 {
        handles.push(
            pool.submit(tokio::time::sleep(Duration::from_millis(500)))
                .await
                .unwrap(),
        );
    }

    let report = pool.shutdown(Duration::from_millis(50)).await;
    assert_eq!(report.submitted, 6);
    assert_eq!(report.completed + report.cancelled, report.submitted);
    assert_eq!(report.forced, 6);

    for result in join_all(handles).await {
        assert_eq!(result, Err(PoolError::Cancelled));
    }

    // A second call only reports.
    let again = pool.shutdown(Duration::from_millis(10)).await;
    assert_eq!(again.cancelled, report.cancelled);
    assert_eq!(again.forced, 0);
}

#[tokio::test]
async fn surplus_workers_retire_when_idle() {
    let pool = WorkerPool::new(
        PoolConfig::new("elastic")
            .with_bounds(1, 3)
            .with_queue_capacity(0)
            .with_overflow(OverflowPolicy::RejectWithError)
            .with_idle_timeout(Duration::from_millis(50)),
    )
    .unwrap();

    let handles =
        join_all((0..3).map(|_| pool.submit(tokio::time::sleep(Duration::from_millis(10))))).await;
    assert_eq!(pool.status().workers, 3);
    for handle in handles {
        assert_eq!(handle.unwrap().await, Ok(()));
    }

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(pool.status().workers, 1);
}

#[tokio::test]
async fn pool_without_core_workers_still_runs_queued_tasks() {
    let pool = WorkerPool::new(
        PoolConfig::new("zero")
            .with_bounds(0, 2)
            .with_queue_capacity(4)
            .with_idle_timeout(Duration::from_millis(50)),
    )
    .unwrap();

    let first = pool.submit(async { 7 }).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), first).await;
    assert_eq!(result.ok(), Some(Ok(7)));

    let handles = join_all((0..3).map(|i| pool.submit(async move { i * 2 }))).await;
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.unwrap().await, Ok(i * 2));
    }

    // The lone worker retires once idle, and the next task brings one back.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pool.status().workers, 0);
    assert_eq!(pool.submit(async { "again" }).await.unwrap().await, Ok("again"));

    let report = pool.shutdown(Duration::from_millis(100)).await;
    assert_eq!(report.completed, 5);
    assert_eq!(report.forced, 0);
}
