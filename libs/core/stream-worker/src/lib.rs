//! Stream Worker Framework
//!
//! Durable background jobs on Redis Streams.
//!
//! ## Features
//!
//! - **Shared connection**: one lazily opened connection per process
//! - **Queue pool**: one cached `StreamQueue` handle per job type
//! - **Retries**: per-queue attempts and backoff, delayed through a sorted set
//! - **History**: bounded completed/failed streams with admin endpoints
//! - **Generic worker**: `StreamWorker<J, P>` processes any job type
//! - **Prometheus metrics** and K8s-ready health endpoints
//!
//! ## Example
//!
//! ```ignore
//! use stream_worker::{QueuePool, SharedConnection, StreamWorker, WorkerConfig};
//!
//! let pool = Arc::new(QueuePool::new(Arc::new(SharedConnection::redis(Some(url)))));
//! pool.queue(SendEmail::QUEUE).add(&SendEmail { .. }).await?;
//!
//! let queue = pool.queue(SendEmail::QUEUE);
//! let config = WorkerConfig::for_queue(&queue);
//! let worker = StreamWorker::new(queue, Arc::new(processor), config);
//! worker.run(shutdown_rx).await?;
//! ```

mod config;
mod connection;
mod consumer;
mod error;
mod event;
mod health;
mod history;
mod keys;
pub mod metrics;
mod options;
mod pool;
mod queue;
mod record;
mod worker;

pub use config::WorkerConfig;
pub use connection::{Connector, SharedConnection};
pub use consumer::{Batch, StreamConsumer};
pub use error::{ErrorCategory, StreamError};
pub use event::StreamEvent;
pub use health::{full_admin_router, health_router, HealthState};
pub use history::{HistoryEntry, JobHistory};
pub use keys::{HistoryKind, QueueKeys, DEFAULT_PREFIX};
pub use metrics::{init_metrics, StreamMetrics};
pub use options::{decide, Backoff, JobOptions, RetryDecision};
pub use pool::QueuePool;
pub use queue::{EnqueuedJob, QueueCounts, StreamQueue};
pub use record::{JobRecord, RECORD_FIELD};
pub use worker::{
    execute, panic_message, settle, JobContext, Settlement, StreamJob, StreamProcessor,
    StreamWorker,
};
