//! Worker-side wrappers around the job handlers.
//!
//! Each wrapper runs its handler, applies the kind's bookkeeping, and hands
//! the outcome to the worker's retry machinery.

use crate::dispatcher::Dispatcher;
use crate::error::{to_stream_error, JobFailure};
use crate::handlers::JobHandlers;
use crate::kinds::{FileTransferPayload, InboundProcessPayload, Job, OutboundSendPayload};
use crate::recorder::FailureRecorder;
use crate::store::AuditEntry;
use async_trait::async_trait;
use eyre::WrapErr;
use futures::FutureExt;
use serde_json::json;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use stream_worker::{panic_message, ErrorCategory, JobContext, StreamError, StreamProcessor};
use tracing::{debug, info, warn};

/// Audit action written when an outbound message gives up.
pub const OUTBOUND_FAILED_ACTION: &str = "telegram_outbound_failed";

/// Default bound on a single handler call.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(300);

/// Run one handler call bounded by `limit`.
///
/// A timeout or panic comes back as an `Err` so the wrapper's bookkeeping
/// runs for it like for any other failure.
pub async fn guarded<T, F>(limit: Duration, call: F) -> eyre::Result<T>
where
    F: Future<Output = eyre::Result<T>>,
{
    match tokio::time::timeout(limit, AssertUnwindSafe(call).catch_unwind()).await {
        Err(_) => {
            warn!(timeout = ?limit, "Job handler timed out");
            Err(eyre::eyre!("handler timed out after {:?}", limit))
        }
        Ok(Err(panic)) => Err(eyre::eyre!("handler panicked: {}", panic_message(&*panic))),
        Ok(Ok(result)) => result,
    }
}

/// When a failed attempt is written to the originating record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMarking {
    /// After every failed attempt, including ones that will be retried
    EveryAttempt,
    /// Only once no retry follows
    FinalAttempt,
}

impl FailureMarking {
    pub fn applies(&self, ctx: &JobContext, report: &eyre::Report) -> bool {
        match self {
            FailureMarking::EveryAttempt => true,
            FailureMarking::FinalAttempt => {
                ctx.is_final_attempt()
                    || to_stream_error(report).category() == ErrorCategory::Permanent
            }
        }
    }
}

/// Inbound updates: follow-on file transfers plus processed/failed marking.
pub struct InboundProcessor {
    handlers: Arc<dyn JobHandlers>,
    dispatcher: Arc<Dispatcher>,
    recorder: FailureRecorder,
    marking: FailureMarking,
    timeout: Duration,
}

impl InboundProcessor {
    pub fn new(
        handlers: Arc<dyn JobHandlers>,
        dispatcher: Arc<Dispatcher>,
        recorder: FailureRecorder,
    ) -> Self {
        Self {
            handlers,
            dispatcher,
            recorder,
            marking: FailureMarking::EveryAttempt,
            timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    pub fn with_marking(mut self, marking: FailureMarking) -> Self {
        self.marking = marking;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, payload: &InboundProcessPayload, ctx: &JobContext) -> eyre::Result<()> {
        let outcome = guarded(self.timeout, self.handlers.process_inbound(payload, ctx)).await?;

        if outcome.skipped {
            debug!(update_id = payload.update_id, "Inbound update skipped by handler");
        }

        for transfer in outcome.file_transfers {
            let attachment_id = transfer.attachment_id;
            self.dispatcher
                .enqueue(Job::FileTransfer(transfer))
                .await
                .wrap_err_with(|| format!("enqueueing file transfer for {}", attachment_id))?;
        }

        self.recorder
            .store()
            .mark_update_processed(payload.bot_id, payload.update_id)
            .await
            .wrap_err("marking update processed")?;

        Ok(())
    }

    fn should_record(&self, ctx: &JobContext, result: &eyre::Result<()>) -> bool {
        match result {
            Err(report) => self.marking.applies(ctx, report),
            Ok(()) => false,
        }
    }
}

#[async_trait]
impl StreamProcessor<InboundProcessPayload> for InboundProcessor {
    async fn process(
        &self,
        payload: &InboundProcessPayload,
        ctx: &JobContext,
    ) -> Result<(), StreamError> {
        let result = self.run(payload, ctx).await;

        let result = if self.should_record(ctx, &result) {
            let (bot_id, update_id) = (payload.bot_id, payload.update_id);
            self.recorder
                .capture(result, |store, message| async move {
                    store.mark_update_failed(bot_id, update_id, &message).await
                })
                .await
        } else {
            result
        };

        result.map_err(|report| to_stream_error(&report))
    }

    fn name(&self) -> &'static str {
        "inbound_process"
    }
}

/// Outbound messages: on the last failure, mark the message failed and audit it.
pub struct OutboundProcessor {
    handlers: Arc<dyn JobHandlers>,
    recorder: FailureRecorder,
    marking: FailureMarking,
    timeout: Duration,
}

impl OutboundProcessor {
    pub fn new(handlers: Arc<dyn JobHandlers>, recorder: FailureRecorder) -> Self {
        Self {
            handlers,
            recorder,
            marking: FailureMarking::FinalAttempt,
            timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    pub fn with_marking(mut self, marking: FailureMarking) -> Self {
        self.marking = marking;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl StreamProcessor<OutboundSendPayload> for OutboundProcessor {
    async fn process(
        &self,
        payload: &OutboundSendPayload,
        ctx: &JobContext,
    ) -> Result<(), StreamError> {
        let result = guarded(self.timeout, self.handlers.send_outbound(payload, ctx)).await;

        let should_record = matches!(&result, Err(report) if self.marking.applies(ctx, report));
        let result = if should_record {
            let payload = payload.clone();
            let attempt = ctx.attempt;
            self.recorder
                .capture(result, |store, message| async move {
                    let marked = store.mark_message_failed(payload.message_id, &message).await;
                    let audited = store
                        .append_audit(AuditEntry::system(
                            payload.tenant_id,
                            "message",
                            payload.message_id,
                            OUTBOUND_FAILED_ACTION,
                            json!({
                                "conversation_id": payload.conversation_id,
                                "error": message,
                                "attempt": attempt,
                            }),
                        ))
                        .await;
                    marked.and(audited)
                })
                .await
        } else {
            result
        };

        if result.is_ok() {
            info!(message_id = %payload.message_id, "Outbound message sent");
        }

        result.map_err(|report| to_stream_error(&report))
    }

    fn name(&self) -> &'static str {
        "outbound_send"
    }
}

/// File transfers: no bookkeeping of their own.
pub struct FileTransferProcessor {
    handlers: Arc<dyn JobHandlers>,
    timeout: Duration,
}

impl FileTransferProcessor {
    pub fn new(handlers: Arc<dyn JobHandlers>) -> Self {
        Self {
            handlers,
            timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl StreamProcessor<FileTransferPayload> for FileTransferProcessor {
    async fn process(
        &self,
        payload: &FileTransferPayload,
        ctx: &JobContext,
    ) -> Result<(), StreamError> {
        if payload.file_id.trim().is_empty() {
            return Err(to_stream_error(&JobFailure::permanent("empty provider file handle").into()));
        }

        guarded(self.timeout, self.handlers.transfer_file(payload, ctx))
            .await
            .map_err(|report| to_stream_error(&report))
    }

    fn name(&self) -> &'static str {
        "file_transfer"
    }
}
