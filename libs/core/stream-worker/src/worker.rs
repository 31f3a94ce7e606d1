//! Core worker traits and the generic StreamWorker implementation.
//!
//! This module provides:
//! - `StreamJob` trait for job payloads
//! - `StreamProcessor` trait for job processors
//! - `StreamWorker` struct for running the worker loop

use crate::config::WorkerConfig;
use crate::consumer::{Batch, StreamConsumer};
use crate::error::{ErrorCategory, StreamError};
use crate::event::StreamEvent;
use crate::keys::HistoryKind;
use crate::metrics::StreamMetrics;
use crate::options::{decide, RetryDecision};
use crate::queue::StreamQueue;
use crate::record::JobRecord;
use async_trait::async_trait;
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use std::any::Any;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Trait for job payloads.
///
/// Each payload type is bound to one queue.
///
/// ```rust,ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct OutboundSend { message_id: Uuid }
///
/// impl StreamJob for OutboundSend {
///     const QUEUE: &'static str = "outbound-send";
///
///     fn idempotency_key(&self) -> Option<String> {
///         Some(format!("outbound:{}", self.message_id))
///     }
/// }
/// ```
pub trait StreamJob: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Queue this job type is enqueued on.
    const QUEUE: &'static str;

    /// Key a handler can use to detect a duplicate delivery.
    fn idempotency_key(&self) -> Option<String> {
        None
    }
}

/// Per-attempt information handed to processors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobContext {
    pub job_id: Uuid,
    pub queue: String,
    /// 1-based
    pub attempt: u32,
    pub max_attempts: u32,
    pub idempotency_key: Option<String>,
    pub stream_id: String,
}

impl JobContext {
    pub fn from_event(event: &StreamEvent) -> Self {
        let record = &event.record;
        Self {
            job_id: record.id,
            queue: record.name.clone(),
            attempt: record.current_attempt(),
            max_attempts: record.max_attempts,
            idempotency_key: record.idempotency_key.clone(),
            stream_id: event.stream_id.clone(),
        }
    }

    /// No retry follows a failure of this attempt.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Trait for job processors.
///
/// Return `Ok(())` for success. A transient error is retried while attempts
/// remain, a permanent one fails the job at once.
#[async_trait]
pub trait StreamProcessor<J: StreamJob>: Send + Sync {
    async fn process(&self, job: &J, ctx: &JobContext) -> Result<(), StreamError>;

    /// Processor name for logs and metrics.
    fn name(&self) -> &'static str;

    async fn health_check(&self) -> Result<bool, StreamError> {
        Ok(true)
    }
}

/// Where a delivered job goes after one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Completed,
    Retry { record: JobRecord, delay: Duration },
    Failed { record: JobRecord },
}

/// Map an attempt's result to the job's next state.
pub fn settle(record: &JobRecord, result: &Result<(), StreamError>) -> Settlement {
    let Err(err) = result else {
        return Settlement::Completed;
    };

    let failed = record.failed_attempt(err.to_string());
    match decide(
        failed.attempts_made,
        failed.max_attempts,
        &failed.backoff,
        err.category(),
    ) {
        RetryDecision::Retry { delay } => Settlement::Retry {
            record: failed,
            delay,
        },
        RetryDecision::Exhausted => Settlement::Failed { record: failed },
    }
}

/// Run one attempt, bounded by `timeout`, with panics turned into errors.
pub async fn execute<J, P>(
    processor: &P,
    job: &J,
    ctx: &JobContext,
    timeout: Duration,
) -> Result<(), StreamError>
where
    J: StreamJob,
    P: StreamProcessor<J> + ?Sized,
{
    let attempt = AssertUnwindSafe(processor.process(job, ctx)).catch_unwind();

    match tokio::time::timeout(timeout, attempt).await {
        Err(_) => Err(StreamError::Timeout(timeout)),
        Ok(Err(panic)) => Err(StreamError::transient(format!(
            "processor panicked: {}",
            panic_message(&*panic)
        ))),
        Ok(Ok(result)) => result,
    }
}

/// Text of a caught panic payload.
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Generic stream worker that processes one queue with one processor.
///
/// - Consumer group management
/// - Recovery of this consumer's unacknowledged entries on startup
/// - Delayed retries with per-queue backoff
/// - Bounded completed/failed history
/// - Claiming of entries abandoned by dead consumers
/// - Concurrent processing bounded by `max_concurrent_jobs`
/// - Graceful shutdown
pub struct StreamWorker<J, P>
where
    J: StreamJob,
    P: StreamProcessor<J>,
{
    queue: Arc<StreamQueue>,
    processor: Arc<P>,
    config: WorkerConfig,
    metrics: StreamMetrics,
    concurrency_semaphore: Arc<Semaphore>,
    _phantom: PhantomData<fn() -> J>,
}

impl<J, P> StreamWorker<J, P>
where
    J: StreamJob,
    P: StreamProcessor<J> + 'static,
{
    pub fn new(queue: Arc<StreamQueue>, processor: Arc<P>, config: WorkerConfig) -> Self {
        let metrics = StreamMetrics::new(queue.name(), processor.name());
        let concurrency_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));

        Self {
            queue,
            processor,
            config,
            metrics,
            concurrency_semaphore,
            _phantom: PhantomData,
        }
    }

    pub fn queue(&self) -> &Arc<StreamQueue> {
        &self.queue
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run the worker loop until `shutdown` turns true or the connection closes.
    ///
    /// In-flight jobs of the current batch finish before this returns.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), StreamError> {
        info!(
            consumer_id = %self.config.consumer_id,
            queue = %self.queue.name(),
            stream = %self.config.stream_name,
            group = %self.config.consumer_group,
            processor = %self.processor.name(),
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "Starting stream worker"
        );

        let conn = self.queue.connection().get().await?;
        let consumer = StreamConsumer::new(conn, self.config.clone());
        consumer.init_consumer_group().await?;

        match consumer.read_pending(self.config.batch_size.max(100)).await {
            Ok(batch) if !batch.is_empty() => {
                info!(count = batch.len(), "Recovering unacknowledged jobs");
                self.process_batch(&consumer, batch).await;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to read pending jobs on startup"),
        }

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut last_claim = Instant::now();
        let mut consecutive_errors: u32 = 0;
        const MAX_BACKOFF_SECS: u64 = 30;

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping worker");
                break;
            }

            let busy = match self.tick(&consumer).await {
                Ok(busy) => {
                    if consecutive_errors > 0 {
                        info!(consecutive_errors, "Queue backend recovered");
                        consecutive_errors = 0;
                    }
                    busy
                }
                Err(StreamError::Closed) => {
                    info!("Queue connection closed, stopping worker");
                    break;
                }
                Err(e) => {
                    consecutive_errors += 1;

                    if e.is_nogroup_error() {
                        warn!("Consumer group missing, recreating");
                        if let Err(create_err) = consumer.init_consumer_group().await {
                            error!(error = %create_err, "Failed to recreate consumer group");
                        }
                    } else if e.is_connection_error() {
                        let backoff_secs =
                            std::cmp::min(2u64.pow(consecutive_errors.min(5)), MAX_BACKOFF_SECS);
                        warn!(
                            error = %e,
                            consecutive_errors,
                            backoff_secs,
                            "Redis connection error, backing off"
                        );
                        tokio::select! {
                            _ = shutdown.changed() => {}
                            _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                        }
                        continue;
                    } else {
                        error!(error = %e, "Error in worker loop");
                    }
                    false
                }
            };

            if last_claim.elapsed() >= self.config.claim_interval {
                self.claim_and_report(&consumer).await;
                last_claim = Instant::now();
            }

            if busy {
                continue;
            }

            if self.config.blocking_timeout_ms.is_none() {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }

        info!(queue = %self.queue.name(), "Stream worker stopped");
        Ok(())
    }

    /// Promote due retries and process one batch. Returns whether work was found.
    async fn tick(&self, consumer: &StreamConsumer) -> Result<bool, StreamError> {
        self.queue.promote_due(self.config.promote_batch).await?;

        let batch = consumer.read_new(self.config.batch_size).await?;
        if batch.is_empty() {
            return Ok(false);
        }

        self.process_batch(consumer, batch).await;
        Ok(true)
    }

    async fn claim_and_report(&self, consumer: &StreamConsumer) {
        match consumer.claim_abandoned(self.config.batch_size).await {
            Ok(batch) if !batch.is_empty() => {
                self.metrics.message_claimed(batch.len());
                self.process_batch(consumer, batch).await;
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Error claiming abandoned jobs"),
        }

        match self.queue.counts().await {
            Ok(counts) => self.metrics.queue_counts(&counts),
            Err(e) => debug!(error = %e, "Failed to read queue counts"),
        }
    }

    async fn process_batch(&self, consumer: &StreamConsumer, batch: Batch) {
        for stream_id in &batch.malformed {
            if let Err(e) = consumer.ack(stream_id).await {
                error!(stream_id = %stream_id, error = %e, "Failed to drop malformed entry");
            }
        }

        let mut join_set: JoinSet<()> = JoinSet::new();

        for event in batch.events {
            let semaphore = Arc::clone(&self.concurrency_semaphore);
            let queue = Arc::clone(&self.queue);
            let processor = Arc::clone(&self.processor);
            let consumer = consumer.clone();
            let metrics = self.metrics.clone();
            let timeout = self.config.job_timeout;

            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                Self::handle_event(&queue, processor.as_ref(), &consumer, &metrics, timeout, event)
                    .await;
            });
        }

        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Job task failed to complete");
            }
        }
    }

    async fn handle_event(
        queue: &StreamQueue,
        processor: &P,
        consumer: &StreamConsumer,
        metrics: &StreamMetrics,
        timeout: Duration,
        event: StreamEvent,
    ) {
        metrics.job_received();
        let ctx = JobContext::from_event(&event);

        let result = match serde_json::from_value::<J>(event.record.data.clone()) {
            Ok(job) => {
                debug!(
                    job_id = %ctx.job_id,
                    attempt = ctx.attempt,
                    redelivery = event.is_redelivery(),
                    "Processing job"
                );
                let start = Instant::now();
                let result = execute(processor, &job, &ctx, timeout).await;
                if result.is_ok() {
                    metrics.job_completed(start.elapsed());
                }
                result
            }
            Err(e) => Err(StreamError::permanent(format!("invalid job payload: {}", e))),
        };

        if let Err(e) = &result {
            if matches!(e, StreamError::Timeout(_)) {
                metrics.job_timed_out();
            }
            metrics.job_failed(e.category());
        }

        let settled = match settle(&event.record, &result) {
            Settlement::Completed => {
                queue
                    .record_history(HistoryKind::Completed, &event.record)
                    .await
            }
            Settlement::Retry { record, delay } => {
                warn!(
                    job_id = %record.id,
                    queue = %record.name,
                    attempt = record.attempts_made,
                    max_attempts = record.max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = record.last_error.as_deref().unwrap_or_default(),
                    "Job attempt failed, retrying"
                );
                metrics.job_retried();
                queue.schedule_retry(&record, delay).await
            }
            Settlement::Failed { record } => {
                let category = result
                    .as_ref()
                    .err()
                    .map(StreamError::category)
                    .unwrap_or(ErrorCategory::Permanent);
                error!(
                    job_id = %record.id,
                    queue = %record.name,
                    attempts = record.attempts_made,
                    error_category = category.as_str(),
                    error = record.last_error.as_deref().unwrap_or_default(),
                    "Job failed"
                );
                metrics.job_exhausted();
                queue.record_history(HistoryKind::Failed, &record).await
            }
        };

        // Left unacknowledged on failure so another consumer can claim it
        if let Err(e) = settled {
            error!(
                stream_id = %event.stream_id,
                job_id = %ctx.job_id,
                error = %e,
                "Failed to settle job"
            );
            return;
        }

        if let Err(e) = consumer.ack(&event.stream_id).await {
            error!(stream_id = %event.stream_id, error = %e, "Failed to ACK job");
        }
    }
}
