//! Durable-mode worker runtime: one stream worker per job kind.

use crate::config::WorkerSettings;
use crate::dispatcher::Dispatcher;
use crate::handlers::JobHandlers;
use crate::kinds::{FileTransferPayload, InboundProcessPayload, JobKind, OutboundSendPayload};
use crate::processors::{FileTransferProcessor, InboundProcessor, OutboundProcessor};
use crate::recorder::FailureRecorder;
use crate::store::JobStore;
use std::sync::Arc;
use std::time::Duration;
use stream_worker::{
    QueuePool, StreamError, StreamJob, StreamProcessor, StreamQueue, StreamWorker, WorkerConfig,
};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

type WorkerHandle = (JobKind, JoinHandle<Result<(), StreamError>>);

/// Time the worker allows past the handler timeout for failure bookkeeping.
pub const BOOKKEEPING_GRACE: Duration = Duration::from_secs(30);

/// Running workers for all three job kinds, sharing one queue pool.
pub struct JobWorkers {
    pool: Arc<QueuePool>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<WorkerHandle>>,
}

impl JobWorkers {
    /// Spawn the workers. Must be called inside a Tokio runtime.
    pub fn start(
        pool: Arc<QueuePool>,
        dispatcher: Arc<Dispatcher>,
        handlers: Arc<dyn JobHandlers>,
        store: Arc<dyn JobStore>,
        settings: &WorkerSettings,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let recorder = FailureRecorder::new(store);

        let handles = vec![
            spawn_worker::<InboundProcessPayload, _>(
                JobKind::InboundProcess,
                &pool,
                InboundProcessor::new(handlers.clone(), dispatcher, recorder.clone())
                    .with_timeout(settings.job_timeout),
                settings,
                shutdown_rx.clone(),
            ),
            spawn_worker::<OutboundSendPayload, _>(
                JobKind::OutboundSend,
                &pool,
                OutboundProcessor::new(handlers.clone(), recorder)
                    .with_timeout(settings.job_timeout),
                settings,
                shutdown_rx.clone(),
            ),
            spawn_worker::<FileTransferPayload, _>(
                JobKind::FileTransfer,
                &pool,
                FileTransferProcessor::new(handlers).with_timeout(settings.job_timeout),
                settings,
                shutdown_rx,
            ),
        ];

        info!(
            workers = handles.len(),
            concurrency = settings.concurrency,
            prefix = %pool.prefix(),
            "Job workers started"
        );

        Self {
            pool,
            shutdown,
            handles: Mutex::new(handles),
        }
    }

    pub fn pool(&self) -> &Arc<QueuePool> {
        &self.pool
    }

    /// Stop every worker, wait for in-flight jobs, then release the pool.
    ///
    /// Later calls find nothing left to join and return immediately.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);

        let handles = std::mem::take(&mut *self.handles.lock().await);
        for (kind, handle) in handles {
            match handle.await {
                Ok(Ok(())) => info!(job_kind = %kind, "Worker stopped"),
                Ok(Err(e)) => warn!(job_kind = %kind, error = %e, "Worker stopped with error"),
                Err(e) => error!(job_kind = %kind, error = %e, "Worker task panicked"),
            }
        }

        self.pool.close().await;
    }
}

/// Worker settings for one queue.
///
/// The handler timeout applies inside the processors; the worker's own bound
/// leaves room for the failure bookkeeping that follows it.
pub fn worker_config(queue: &StreamQueue, settings: &WorkerSettings) -> WorkerConfig {
    let mut config = WorkerConfig::for_queue(queue)
        .with_max_concurrent_jobs(settings.concurrency)
        .with_job_timeout(settings.job_timeout + BOOKKEEPING_GRACE);
    if let Some(consumer_id) = &settings.consumer_id {
        config = config.with_consumer_id(consumer_id.clone());
    }
    config
}

fn spawn_worker<J, P>(
    kind: JobKind,
    pool: &QueuePool,
    processor: P,
    settings: &WorkerSettings,
    shutdown: watch::Receiver<bool>,
) -> WorkerHandle
where
    J: StreamJob,
    P: StreamProcessor<J> + 'static,
{
    let queue = pool.queue(J::QUEUE);
    let config = worker_config(&queue, settings);

    let worker = StreamWorker::<J, P>::new(queue, Arc::new(processor), config);
    (kind, tokio::spawn(async move { worker.run(shutdown).await }))
}
