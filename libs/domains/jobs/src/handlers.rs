//! Handler registration: one business-logic entry point per job kind.

use crate::kinds::{FileTransferPayload, InboundProcessPayload, OutboundSendPayload};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stream_worker::JobContext;

/// Result of processing an inbound update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundOutcome {
    /// The update was recognised as irrelevant and ignored
    pub skipped: bool,
    /// Attachments to fetch as follow-on jobs
    pub file_transfers: Vec<FileTransferPayload>,
}

impl InboundOutcome {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            file_transfers: Vec::new(),
        }
    }

    pub fn with_file_transfers(file_transfers: Vec<FileTransferPayload>) -> Self {
        Self {
            skipped: false,
            file_transfers,
        }
    }
}

/// Business logic behind each job kind.
///
/// Implementations must tolerate being run more than once for the same
/// payload; `ctx.idempotency_key` identifies repeats.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobHandlers: Send + Sync {
    async fn process_inbound(
        &self,
        payload: &InboundProcessPayload,
        ctx: &JobContext,
    ) -> eyre::Result<InboundOutcome>;

    async fn send_outbound(&self, payload: &OutboundSendPayload, ctx: &JobContext)
        -> eyre::Result<()>;

    async fn transfer_file(&self, payload: &FileTransferPayload, ctx: &JobContext)
        -> eyre::Result<()>;
}
