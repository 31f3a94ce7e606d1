//! The two ways a job can be carried out.

use crate::config::DispatchMode;
use crate::error::{DispatchError, DispatchResult};
use crate::handlers::{InboundOutcome, JobHandlers};
use crate::kinds::{
    FileTransferPayload, InboundProcessPayload, Job, OutboundSendPayload,
};
use async_trait::async_trait;
use std::sync::Arc;
use stream_worker::{EnqueuedJob, JobContext, QueuePool, StreamError, StreamJob};
use uuid::Uuid;

/// What an inline run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutput {
    Inbound(InboundOutcome),
    OutboundSent,
    FileTransferred,
}

/// Result of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// The handler already ran
    Inline(JobOutput),
    /// One durable record was written
    Queued(EnqueuedJob),
}

impl Dispatched {
    pub fn mode(&self) -> DispatchMode {
        match self {
            Dispatched::Inline(_) => DispatchMode::Inline,
            Dispatched::Queued(_) => DispatchMode::Durable,
        }
    }
}

/// Strategy chosen per call by the dispatcher.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    fn mode(&self) -> DispatchMode;

    async fn execute(&self, job: &Job) -> DispatchResult<Dispatched>;
}

/// Durable enqueue of a job onto its kind's queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &Job) -> Result<EnqueuedJob, StreamError>;
}

#[async_trait]
impl JobQueue for QueuePool {
    async fn enqueue(&self, job: &Job) -> Result<EnqueuedJob, StreamError> {
        match job {
            Job::InboundProcess(p) => self.queue(InboundProcessPayload::QUEUE).add(p).await,
            Job::OutboundSend(p) => self.queue(OutboundSendPayload::QUEUE).add(p).await,
            Job::FileTransfer(p) => self.queue(FileTransferPayload::QUEUE).add(p).await,
        }
    }
}

/// Runs the registered handler in the caller's task.
///
/// No retries and no persistence: the handler's result is returned as is.
#[derive(Clone)]
pub struct InlineExecutor {
    handlers: Arc<dyn JobHandlers>,
}

impl InlineExecutor {
    pub fn new(handlers: Arc<dyn JobHandlers>) -> Self {
        Self { handlers }
    }

    pub async fn run(&self, job: &Job) -> eyre::Result<JobOutput> {
        let ctx = inline_context(job);

        match job {
            Job::InboundProcess(p) => self
                .handlers
                .process_inbound(p, &ctx)
                .await
                .map(JobOutput::Inbound),
            Job::OutboundSend(p) => self
                .handlers
                .send_outbound(p, &ctx)
                .await
                .map(|()| JobOutput::OutboundSent),
            Job::FileTransfer(p) => self
                .handlers
                .transfer_file(p, &ctx)
                .await
                .map(|()| JobOutput::FileTransferred),
        }
    }
}

#[async_trait]
impl JobExecutor for InlineExecutor {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Inline
    }

    async fn execute(&self, job: &Job) -> DispatchResult<Dispatched> {
        self.run(job)
            .await
            .map(Dispatched::Inline)
            .map_err(DispatchError::Handler)
    }
}

/// Writes one durable record per call.
#[derive(Clone)]
pub struct DurableExecutor {
    queue: Arc<dyn JobQueue>,
}

impl DurableExecutor {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl JobExecutor for DurableExecutor {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Durable
    }

    async fn execute(&self, job: &Job) -> DispatchResult<Dispatched> {
        Ok(Dispatched::Queued(self.queue.enqueue(job).await?))
    }
}

/// Context for a run that has no durable record: a single, final attempt.
pub fn inline_context(job: &Job) -> JobContext {
    JobContext {
        job_id: Uuid::now_v7(),
        queue: job.kind().queue_name().to_string(),
        attempt: 1,
        max_attempts: 1,
        idempotency_key: job.idempotency_key(),
        stream_id: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::MockJobHandlers;
    use stream_worker::SharedConnection;

    fn outbound() -> Job {
        Job::from(OutboundSendPayload {
            tenant_id: Uuid::nil(),
            conversation_id: Uuid::nil(),
            message_id: Uuid::nil(),
        })
    }

    #[tokio::test]
    async fn test_inline_returns_handler_result() {
        let mut handlers = MockJobHandlers::new();
        handlers
            .expect_send_outbound()
            .times(1)
            .returning(|_, ctx| {
                assert!(ctx.is_final_attempt());
                Ok(())
            });

        let executor = InlineExecutor::new(Arc::new(handlers));
        let dispatched = executor.execute(&outbound()).await.unwrap();

        assert_eq!(dispatched, Dispatched::Inline(JobOutput::OutboundSent));
    }

    #[tokio::test]
    async fn test_inline_surfaces_handler_error_unchanged() {
        let mut handlers = MockJobHandlers::new();
        handlers
            .expect_send_outbound()
            .returning(|_, _| Err(eyre::eyre!("provider rejected message")));

        let executor = InlineExecutor::new(Arc::new(handlers));
        let err = executor.execute(&outbound()).await.unwrap_err();

        let report = err.handler_report().expect("handler error");
        assert_eq!(report.to_string(), "provider rejected message");
    }

    #[tokio::test]
    async fn test_durable_without_backend_fails_enqueue() {
        let pool = QueuePool::new(Arc::new(SharedConnection::redis(None)));
        let executor = DurableExecutor::new(Arc::new(pool));

        let err = executor.execute(&outbound()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Enqueue(StreamError::Config(_))));
    }
}
