//! Jobs Domain
//!
//! Background job dispatch for the bot platform: inbound update processing,
//! outbound message delivery, and file transfers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  Dispatcher  │  ← enqueue(): picks inline or durable per call
//! └──────┬───────┘
//!        │ durable                    inline
//! ┌──────▼───────┐            ┌────────────────┐
//! │  QueuePool   │            │ InlineExecutor │ ← handlers run in the caller
//! └──────┬───────┘            └────────────────┘
//!        │ Redis streams
//! ┌──────▼───────┐
//! │  JobWorkers  │  ← one StreamWorker per kind, retries with backoff
//! └──────┬───────┘
//!        │
//! ┌──────▼───────┐
//! │  Processors  │  ← handlers + FailureRecorder bookkeeping
//! └──────────────┘
//! ```
//!
//! When no backend is configured, or inline mode is forced, every job runs
//! inline. A durable enqueue that fails falls back to inline unless that is
//! switched off.
//!
//! # Usage
//!
//! ```rust,no_run
//! use domain_jobs::{DispatchConfig, Dispatcher, JobHandlers, OutboundSendPayload};
//! use core_config::FromEnv;
//! use std::sync::Arc;
//!
//! # async fn example(handlers: Arc<dyn JobHandlers>) -> eyre::Result<()> {
//! let dispatcher = Dispatcher::from_config(DispatchConfig::from_env()?, handlers);
//!
//! dispatcher
//!     .enqueue(
//!         OutboundSendPayload {
//!             tenant_id: uuid::Uuid::nil(),
//!             conversation_id: uuid::Uuid::now_v7(),
//!             message_id: uuid::Uuid::now_v7(),
//!         }
//!         .into(),
//!     )
//!     .await?;
//!
//! dispatcher.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod kinds;
pub mod processors;
pub mod recorder;
pub mod runtime;
pub mod store;

// Re-export commonly used types
pub use config::{DispatchConfig, DispatchMode, WorkerSettings};
pub use dispatcher::Dispatcher;
pub use error::{to_stream_error, DispatchError, DispatchResult, JobFailure};
pub use executor::{Dispatched, DurableExecutor, InlineExecutor, JobExecutor, JobOutput, JobQueue};
pub use handlers::{InboundOutcome, JobHandlers};
pub use kinds::{FileTransferPayload, InboundProcessPayload, Job, JobKind, OutboundSendPayload};
pub use processors::{
    FailureMarking, FileTransferProcessor, InboundProcessor, OutboundProcessor,
    OUTBOUND_FAILED_ACTION,
};
pub use recorder::FailureRecorder;
pub use runtime::JobWorkers;
pub use store::{AuditEntry, InMemoryJobStore, JobStore, StoreError, StoreResult};
