//! End-to-end queue behavior against a real Redis.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stream_worker::{
    Backoff, HistoryKind, JobContext, JobOptions, QueuePool, SharedConnection, StreamError,
    StreamJob, StreamProcessor, StreamWorker, WorkerConfig,
};
use test_utils::assertions::eventually;
use test_utils::{TestDataBuilder, TestRedis};
use tokio::sync::watch;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Greet {
    name: String,
}

impl StreamJob for Greet {
    const QUEUE: &'static str = "greet";

    fn idempotency_key(&self) -> Option<String> {
        Some(format!("greet:{}", self.name))
    }
}

struct Greeter {
    fail_with: Option<fn() -> StreamError>,
    attempts: AtomicU32,
}

#[async_trait]
impl StreamProcessor<Greet> for Greeter {
    async fn process(&self, _job: &Greet, ctx: &JobContext) -> Result<(), StreamError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        assert_eq!(ctx.idempotency_key.as_deref(), Some("greet:ada"));
        match self.fail_with {
            Some(err) => Err(err()),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "greeter"
    }
}

fn pool(redis: &TestRedis, test: &str) -> Arc<QueuePool> {
    let connection = Arc::new(SharedConnection::redis(Some(
        redis.connection_string().to_string(),
    )));
    let options = JobOptions::default().with_backoff(Backoff::Fixed { delay_ms: 20 });
    Arc::new(
        QueuePool::new(connection)
            .with_prefix(TestDataBuilder::from_test_name(test).key_prefix())
            .with_default_options(options),
    )
}

async fn run_worker(
    pool: &Arc<QueuePool>,
    processor: Arc<Greeter>,
) -> (watch::Sender<bool>, tokio::task::JoinHandle<Result<(), StreamError>>) {
    let queue = pool.queue(Greet::QUEUE);
    let config = WorkerConfig::for_queue(&queue).with_poll_interval_ms(10);
    let worker = StreamWorker::new(queue, processor, config);

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(rx).await });
    (tx, handle)
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_job_completes_and_lands_in_history() {
    let redis = TestRedis::new().await;
    let pool = pool(&redis, "test_job_completes_and_lands_in_history");
    let processor = Arc::new(Greeter {
        fail_with: None,
        attempts: AtomicU32::new(0),
    });

    let (shutdown, handle) = run_worker(&pool, processor.clone()).await;
    let queue = pool.queue(Greet::QUEUE);
    let receipt = queue.add(&Greet { name: "ada".into() }).await.unwrap();

    let q = &queue;
    let entry = eventually(Duration::from_secs(5), || async move {
        q.history()
            .list(HistoryKind::Completed, 10)
            .await
            .ok()
            .and_then(|entries| entries.into_iter().next())
    })
    .await
    .expect("job never completed");

    assert_eq!(entry.record.id, receipt.job_id);
    assert!(entry.record.finished_at.is_some());
    assert_eq!(processor.attempts.load(Ordering::SeqCst), 1);

    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let counts = queue.counts().await.unwrap();
    assert_eq!(counts.live, 0);
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.completed, 1);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_transient_failure_exhausts_three_attempts() {
    let redis = TestRedis::new().await;
    let pool = pool(&redis, "test_transient_failure_exhausts_three_attempts");
    let processor = Arc::new(Greeter {
        fail_with: Some(|| StreamError::transient("upstream down")),
        attempts: AtomicU32::new(0),
    });

    let (shutdown, handle) = run_worker(&pool, processor.clone()).await;
    let queue = pool.queue(Greet::QUEUE);
    queue.add(&Greet { name: "ada".into() }).await.unwrap();

    let q = &queue;
    let failed = eventually(Duration::from_secs(5), || async move {
        q.history()
            .list(HistoryKind::Failed, 10)
            .await
            .ok()
            .and_then(|entries| entries.into_iter().next())
    })
    .await
    .expect("job never failed");

    assert_eq!(failed.record.attempts_made, 3);
    assert_eq!(processor.attempts.load(Ordering::SeqCst), 3);

    // A manual re-run starts a fresh attempt budget
    let rerun = queue
        .history()
        .retry_failed(&failed.entry_id)
        .await
        .unwrap()
        .expect("entry should exist");
    assert_eq!(rerun.job_id, failed.record.id);

    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_permanent_failure_is_not_retried() {
    let redis = TestRedis::new().await;
    let pool = pool(&redis, "test_permanent_failure_is_not_retried");
    let processor = Arc::new(Greeter {
        fail_with: Some(|| StreamError::permanent("rejected")),
        attempts: AtomicU32::new(0),
    });

    let (shutdown, handle) = run_worker(&pool, processor.clone()).await;
    let queue = pool.queue(Greet::QUEUE);
    queue.add(&Greet { name: "ada".into() }).await.unwrap();

    let q = &queue;
    let failed = eventually(Duration::from_secs(5), || async move {
        let len = q.history().len(HistoryKind::Failed).await.ok()?;
        (len > 0).then_some(len)
    })
    .await;

    assert_eq!(failed, Some(1));
    assert_eq!(processor.attempts.load(Ordering::SeqCst), 1);

    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_pool_close_stops_worker() {
    let redis = TestRedis::new().await;
    let pool = pool(&redis, "test_pool_close_stops_worker");
    let processor = Arc::new(Greeter {
        fail_with: None,
        attempts: AtomicU32::new(0),
    });

    let (_shutdown, handle) = run_worker(&pool, processor).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    pool.close().await;
    pool.close().await;

    let stopped = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(stopped.is_ok());
    assert!(pool.is_empty());
}
