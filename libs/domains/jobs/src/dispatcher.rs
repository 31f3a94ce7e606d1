//! Public enqueue API with per-call mode selection and inline fallback.
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::from_config(DispatchConfig::from_env()?, handlers);
//! dispatcher.enqueue(OutboundSendPayload { .. }.into()).await?;
//! ```

use crate::config::{DispatchConfig, DispatchMode};
use crate::error::{DispatchError, DispatchResult};
use crate::executor::{
    Dispatched, DurableExecutor, InlineExecutor, JobExecutor, JobOutput, JobQueue,
};
use crate::handlers::JobHandlers;
use crate::kinds::Job;
use metrics::counter;
use std::sync::Arc;
use stream_worker::{QueuePool, SharedConnection};
use tracing::{debug, instrument, warn};

pub struct Dispatcher {
    config: DispatchConfig,
    inline: InlineExecutor,
    durable: Option<DurableExecutor>,
    pool: Option<Arc<QueuePool>>,
}

impl Dispatcher {
    /// Dispatcher that owns its own queue pool when a backend is configured.
    pub fn from_config(config: DispatchConfig, handlers: Arc<dyn JobHandlers>) -> Self {
        match config.backend_url() {
            Some(url) => {
                let pool = QueuePool::new(Arc::new(SharedConnection::redis(Some(url))))
                    .with_prefix(config.queue_prefix.clone());
                Self::with_pool(config, handlers, Arc::new(pool))
            }
            None => Self::new(config, handlers, None),
        }
    }

    /// Dispatcher sharing an existing pool, e.g. with the worker runtime.
    pub fn with_pool(
        config: DispatchConfig,
        handlers: Arc<dyn JobHandlers>,
        pool: Arc<QueuePool>,
    ) -> Self {
        let queue: Arc<dyn JobQueue> = pool.clone();
        let mut dispatcher = Self::new(config, handlers, Some(queue));
        dispatcher.pool = Some(pool);
        dispatcher
    }

    pub fn new(
        config: DispatchConfig,
        handlers: Arc<dyn JobHandlers>,
        queue: Option<Arc<dyn JobQueue>>,
    ) -> Self {
        Self {
            config,
            inline: InlineExecutor::new(handlers),
            durable: queue.map(DurableExecutor::new),
            pool: None,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Mode used for the next call, before any fallback.
    pub fn mode(&self) -> DispatchMode {
        self.select_executor().mode()
    }

    pub fn select_executor(&self) -> &dyn JobExecutor {
        match (&self.durable, self.config.mode()) {
            (Some(durable), DispatchMode::Durable) => durable,
            _ => &self.inline,
        }
    }

    /// Run `job` inline or persist it, per configuration.
    ///
    /// Exactly one of the two happens for the job itself. File transfers
    /// returned by an inline inbound run are dispatched the same way before
    /// this returns. The inbound job has already succeeded by then, so a
    /// failed transfer is logged and counted but not returned.
    #[instrument(skip_all, fields(job_kind = %job.kind(), tenant_id = %job.tenant_id()))]
    pub async fn enqueue(&self, job: Job) -> DispatchResult<Dispatched> {
        let dispatched = self.dispatch(&job).await?;

        if let Dispatched::Inline(JobOutput::Inbound(outcome)) = &dispatched {
            for transfer in &outcome.file_transfers {
                if let Err(e) = self.dispatch(&Job::FileTransfer(transfer.clone())).await {
                    warn!(
                        file_id = %transfer.file_id,
                        attachment_id = %transfer.attachment_id,
                        error = %e,
                        "Follow-on file transfer failed"
                    );
                    counter!("job_follow_on_failed_total", "kind" => "file-transfer")
                        .increment(1);
                }
            }
        }

        Ok(dispatched)
    }

    async fn dispatch(&self, job: &Job) -> DispatchResult<Dispatched> {
        let executor = self.select_executor();
        let kind = job.kind();

        let result = match executor.execute(job).await {
            Err(DispatchError::Enqueue(e)) if self.config.inline_fallback => {
                warn!(
                    job_kind = %kind,
                    error = %e,
                    "Durable enqueue failed, running job inline"
                );
                counter!("job_dispatch_fallback_total", "kind" => kind.as_ref().to_string())
                    .increment(1);
                self.inline.execute(job).await
            }
            other => other,
        };

        if let Ok(dispatched) = &result {
            debug!(job_kind = %kind, mode = %dispatched.mode(), "Job dispatched");
            counter!(
                "job_dispatch_total",
                "kind" => kind.as_ref().to_string(),
                "mode" => dispatched.mode().as_ref().to_string()
            )
            .increment(1);
        }

        result
    }

    /// Close the owned queue pool, if any. Safe to repeat.
    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MockJobQueue;
    use crate::handlers::{InboundOutcome, MockJobHandlers};
    use crate::kinds::{FileTransferPayload, InboundProcessPayload, OutboundSendPayload};
    use serde_json::json;
    use stream_worker::{EnqueuedJob, StreamError};
    use uuid::Uuid;

    fn outbound() -> Job {
        Job::from(OutboundSendPayload {
            tenant_id: Uuid::nil(),
            conversation_id: Uuid::now_v7(),
            message_id: Uuid::now_v7(),
        })
    }

    fn inbound() -> Job {
        Job::from(InboundProcessPayload {
            tenant_id: Uuid::nil(),
            bot_id: Uuid::now_v7(),
            update_id: 1001,
            update: json!({"message": {"text": "hi"}}),
        })
    }

    fn transfer(name: &str) -> FileTransferPayload {
        FileTransferPayload {
            tenant_id: Uuid::nil(),
            bot_id: Uuid::nil(),
            client_id: None,
            attachment_id: Uuid::now_v7(),
            file_id: format!("file-{}", name),
            file_name: name.to_string(),
            mime_type: None,
            size: None,
        }
    }

    fn receipt(queue: &str) -> EnqueuedJob {
        EnqueuedJob {
            job_id: Uuid::now_v7(),
            queue: queue.to_string(),
            stream_id: "1-0".to_string(),
        }
    }

    fn connection_refused() -> StreamError {
        StreamError::Redis(redis::RedisError::from(std::io::Error::from(
            std::io::ErrorKind::ConnectionRefused,
        )))
    }

    fn durable() -> DispatchConfig {
        DispatchConfig::durable("redis://cache:6379")
    }

    #[tokio::test]
    async fn test_durable_writes_one_record_and_skips_handler() {
        let mut handlers = MockJobHandlers::new();
        handlers.expect_send_outbound().never();

        let mut queue = MockJobQueue::new();
        queue
            .expect_enqueue()
            .times(1)
            .returning(|_| Ok(receipt("outbound-send")));

        let dispatcher = Dispatcher::new(durable(), Arc::new(handlers), Some(Arc::new(queue)));
        let dispatched = dispatcher.enqueue(outbound()).await.unwrap();

        assert!(matches!(dispatched, Dispatched::Queued(ref r) if r.queue == "outbound-send"));
    }

    #[tokio::test]
    async fn test_unset_target_runs_inline_even_with_queue() {
        let mut handlers = MockJobHandlers::new();
        handlers
            .expect_process_inbound()
            .times(1)
            .returning(|_, _| Ok(InboundOutcome::default()));

        let mut queue = MockJobQueue::new();
        queue.expect_enqueue().never();

        let dispatcher = Dispatcher::new(
            DispatchConfig::inline(),
            Arc::new(handlers),
            Some(Arc::new(queue)),
        );
        assert_eq!(dispatcher.mode(), DispatchMode::Inline);

        let dispatched = dispatcher.enqueue(inbound()).await.unwrap();
        assert_eq!(
            dispatched,
            Dispatched::Inline(JobOutput::Inbound(InboundOutcome::default()))
        );
    }

    #[tokio::test]
    async fn test_inline_override_beats_configured_target() {
        let mut handlers = MockJobHandlers::new();
        handlers.expect_send_outbound().times(1).returning(|_, _| Ok(()));

        let mut queue = MockJobQueue::new();
        queue.expect_enqueue().never();

        let dispatcher = Dispatcher::new(
            durable().with_force_inline(true),
            Arc::new(handlers),
            Some(Arc::new(queue)),
        );

        assert!(matches!(
            dispatcher.enqueue(outbound()).await.unwrap(),
            Dispatched::Inline(JobOutput::OutboundSent)
        ));
    }

    #[tokio::test]
    async fn test_enqueue_failure_falls_back_with_identical_payload() {
        let job = outbound();
        let Job::OutboundSend(expected) = job.clone() else {
            unreachable!()
        };

        let mut handlers = MockJobHandlers::new();
        handlers
            .expect_send_outbound()
            .withf(move |payload, _| *payload == expected)
            .times(1)
            .returning(|_, _| Ok(()));

        let mut queue = MockJobQueue::new();
        queue
            .expect_enqueue()
            .times(1)
            .returning(|_| Err(connection_refused()));

        let dispatcher = Dispatcher::new(durable(), Arc::new(handlers), Some(Arc::new(queue)));
        let dispatched = dispatcher.enqueue(job).await.unwrap();

        assert_eq!(dispatched.mode(), DispatchMode::Inline);
    }

    #[tokio::test]
    async fn test_enqueue_failure_without_fallback_surfaces_error() {
        let mut handlers = MockJobHandlers::new();
        handlers.expect_send_outbound().never();

        let mut queue = MockJobQueue::new();
        queue
            .expect_enqueue()
            .times(1)
            .returning(|_| Err(connection_refused()));

        let dispatcher = Dispatcher::new(
            durable().with_inline_fallback(false),
            Arc::new(handlers),
            Some(Arc::new(queue)),
        );
        let err = dispatcher.enqueue(outbound()).await.unwrap_err();

        assert!(matches!(err, DispatchError::Enqueue(_)));
    }

    #[tokio::test]
    async fn test_fallback_handler_error_reaches_caller() {
        let mut handlers = MockJobHandlers::new();
        handlers
            .expect_send_outbound()
            .times(1)
            .returning(|_, _| Err(eyre::eyre!("chat blocked the bot")));

        let mut queue = MockJobQueue::new();
        queue.expect_enqueue().returning(|_| Err(connection_refused()));

        let dispatcher = Dispatcher::new(durable(), Arc::new(handlers), Some(Arc::new(queue)));
        let err = dispatcher.enqueue(outbound()).await.unwrap_err();

        assert_eq!(
            err.handler_report().map(|r| r.to_string()).as_deref(),
            Some("chat blocked the bot")
        );
    }

    #[tokio::test]
    async fn test_inline_inbound_dispatches_file_transfers() {
        let mut handlers = MockJobHandlers::new();
        handlers.expect_process_inbound().times(1).returning(|_, _| {
            Ok(InboundOutcome::with_file_transfers(vec![
                transfer("a.jpg"),
                transfer("b.pdf"),
            ]))
        });
        handlers.expect_transfer_file().times(2).returning(|_, _| Ok(()));

        let dispatcher = Dispatcher::new(DispatchConfig::inline(), Arc::new(handlers), None);
        let dispatched = dispatcher.enqueue(inbound()).await.unwrap();

        assert!(matches!(
            dispatched,
            Dispatched::Inline(JobOutput::Inbound(ref o)) if o.file_transfers.len() == 2
        ));
    }

    #[tokio::test]
    async fn test_failed_file_transfer_keeps_inbound_result() {
        let mut handlers = MockJobHandlers::new();
        handlers.expect_process_inbound().times(1).returning(|_, _| {
            Ok(InboundOutcome::with_file_transfers(vec![
                transfer("broken.jpg"),
                transfer("b.pdf"),
            ]))
        });
        handlers
            .expect_transfer_file()
            .withf(|payload, _| payload.file_name == "broken.jpg")
            .times(1)
            .returning(|_, _| Err(eyre::eyre!("storage unavailable")));
        handlers
            .expect_transfer_file()
            .withf(|payload, _| payload.file_name == "b.pdf")
            .times(1)
            .returning(|_, _| Ok(()));

        let dispatcher = Dispatcher::new(DispatchConfig::inline(), Arc::new(handlers), None);
        let dispatched = dispatcher.enqueue(inbound()).await.unwrap();

        assert!(matches!(
            dispatched,
            Dispatched::Inline(JobOutput::Inbound(ref o)) if o.file_transfers.len() == 2
        ));
    }

    #[tokio::test]
    async fn test_from_config_without_target_has_no_pool() {
        let dispatcher =
            Dispatcher::from_config(DispatchConfig::inline(), Arc::new(MockJobHandlers::new()));

        assert_eq!(dispatcher.mode(), DispatchMode::Inline);
        dispatcher.close().await;
    }
}
